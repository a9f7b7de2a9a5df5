//! Startup orchestration.
//!
//! # Responsibilities
//! - Construct the node's modules in dependency order
//! - Wire each module's shutdown into the process-wide [`Shutdown`]
//! - Join the network through the bootstrap peers
//! - Hand the control thread to the API server's accept loop
//!
//! # Design Decisions
//! - Fail fast: the first construction error aborts the sequence
//! - Modules are constructed one at a time, never concurrently
//! - A failed startup unwinds the modules already built, newest first
//! - The API server starts accepting last (traffic only when ready)

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::NodeConfig;
use crate::lifecycle::bootstrap::{BootstrapJoiner, PeerDialer};
use crate::lifecycle::group::ShutdownError;
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;

/// Type-erased error produced by a module.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Construction stages, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Network,
    ChainState,
    TransactionPool,
    Serving,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Network => "network",
            Stage::ChainState => "chain state",
            Stage::TransactionPool => "transaction pool",
            Stage::Serving => "serving",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable lifecycle of a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// `start` has not been called yet.
    Pending,
    /// The given stage is being constructed.
    Starting(Stage),
    /// Every stage is up and the API server is accepting.
    Running,
    /// Startup aborted at the given stage.
    FailedAtStage(Stage),
    /// The node shut down.
    Stopped,
}

/// Fatal errors returned by [`Node::start`].
#[derive(Debug, Error)]
pub enum NodeError {
    /// A module could not be constructed.
    #[error("failed to start {stage} module: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: BoxError,
    },

    /// The API server's accept loop failed.
    #[error("serving module exited with error: {0}")]
    Serve(#[source] BoxError),
}

impl NodeError {
    /// The stage that failed, if this is a construction error.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            NodeError::Stage { stage, .. } => Some(*stage),
            NodeError::Serve(_) => None,
        }
    }
}

/// A long-running module owned by the node.
pub trait Module: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Stop the module and wait for its in-flight work to drain.
    ///
    /// Blocks the calling thread.
    fn close(&self) -> Result<(), ShutdownError>;
}

/// The request-serving module.
#[async_trait]
pub trait Server: Module {
    /// Accept requests until the module is closed or fails.
    async fn serve(&self) -> Result<(), BoxError>;
}

/// Builds the node's modules.
///
/// Each method receives handles to the modules constructed before it.
#[async_trait]
pub trait ModuleFactory: Send + Sync + 'static {
    type Network: PeerDialer + Module;
    type Chain: Module;
    type Pool: Module;
    type Server: Server;

    async fn network(&self, config: &NodeConfig) -> Result<Arc<Self::Network>, BoxError>;

    async fn chain(
        &self,
        config: &NodeConfig,
        network: Arc<Self::Network>,
    ) -> Result<Arc<Self::Chain>, BoxError>;

    async fn pool(
        &self,
        config: &NodeConfig,
        chain: Arc<Self::Chain>,
        network: Arc<Self::Network>,
    ) -> Result<Arc<Self::Pool>, BoxError>;

    async fn server(
        &self,
        config: &NodeConfig,
        chain: Arc<Self::Chain>,
        network: Arc<Self::Network>,
        pool: Arc<Self::Pool>,
    ) -> Result<Arc<Self::Server>, BoxError>;
}

struct Started<F: ModuleFactory> {
    network: Arc<F::Network>,
    server: Arc<F::Server>,
}

/// The node: sequences module startup and owns the process-wide shutdown.
pub struct Node<F: ModuleFactory> {
    factory: F,
    config: NodeConfig,
    shutdown: Shutdown,
    status: watch::Sender<NodeStatus>,
}

impl<F: ModuleFactory> Node<F> {
    /// Create a node; nothing is constructed until [`Node::start`].
    pub fn new(factory: F, config: NodeConfig) -> Self {
        let (status, _) = watch::channel(NodeStatus::Pending);
        Self {
            factory,
            config,
            shutdown: Shutdown::new(),
            status,
        }
    }

    /// Handle used by signal handling (or tests) to stop the node.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Subscribe to lifecycle updates.
    pub fn status(&self) -> watch::Receiver<NodeStatus> {
        self.status.subscribe()
    }

    /// Start every module, then serve until shutdown.
    ///
    /// Returns `Ok(())` after a requested shutdown has drained, or the error
    /// that stopped startup or serving.
    pub async fn start(self) -> Result<(), NodeError> {
        let started = match self.construct().await {
            Ok(Some(started)) => started,
            Ok(None) => {
                tracing::info!("Shutdown requested during startup");
                self.shutdown.trigger().await;
                self.status.send_replace(NodeStatus::Stopped);
                return Ok(());
            }
            Err(err) => {
                if let Some(stage) = err.stage() {
                    self.status.send_replace(NodeStatus::FailedAtStage(stage));
                }
                // Unwind whatever was already built.
                self.shutdown.trigger().await;
                return Err(err);
            }
        };

        self.status.send_replace(NodeStatus::Running);
        tracing::info!("All modules loaded");

        let joiner = BootstrapJoiner::from_config(self.config.gateway.bootstrap_peers.as_deref());
        joiner.join(Arc::clone(&started.network));

        tracing::info!("Serving requests");
        let result = started.server.serve().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "API server exited with error");
        }

        self.shutdown.trigger().await;
        self.status.send_replace(NodeStatus::Stopped);
        result.map_err(NodeError::Serve)
    }

    /// Run the construction sequence. `None` means shutdown was requested
    /// before the last stage completed.
    async fn construct(&self) -> Result<Option<Started<F>>, NodeError> {
        let config = &self.config;

        let network = self
            .stage(Stage::Network, self.factory.network(config))
            .await?;
        if self.shutdown.is_triggered() {
            return Ok(None);
        }

        let chain = self
            .stage(Stage::ChainState, self.factory.chain(config, Arc::clone(&network)))
            .await?;
        if self.shutdown.is_triggered() {
            return Ok(None);
        }

        let pool = self
            .stage(
                Stage::TransactionPool,
                self.factory
                    .pool(config, Arc::clone(&chain), Arc::clone(&network)),
            )
            .await?;
        if self.shutdown.is_triggered() {
            return Ok(None);
        }

        let server = self
            .stage(
                Stage::Serving,
                self.factory
                    .server(config, chain, Arc::clone(&network), pool),
            )
            .await?;
        if self.shutdown.is_triggered() {
            return Ok(None);
        }

        Ok(Some(Started { network, server }))
    }

    /// Construct one stage and register its teardown with the node.
    async fn stage<M, Fut>(&self, stage: Stage, build: Fut) -> Result<Arc<M>, NodeError>
    where
        M: Module,
        Fut: Future<Output = Result<Arc<M>, BoxError>>,
    {
        self.status.send_replace(NodeStatus::Starting(stage));
        tracing::info!(stage = %stage, "Loading module");

        let module = build.await.map_err(|source| {
            tracing::error!(stage = %stage, error = %source, "Module failed to start");
            NodeError::Stage { stage, source }
        })?;

        // Registered newest-last, so shutdown closes the most dependent module first.
        let hooked = Arc::clone(&module);
        let close = move || {
            tracing::info!(module = hooked.name(), "Closing module");
            if let Err(e) = hooked.close() {
                tracing::debug!(module = hooked.name(), error = %e, "Module was already closed");
            }
        };
        // Shutdown already ran: close here, off the runtime, since close()
        // blocks until the module's own tasks have drained.
        if let Err(close) = self.shutdown.group().try_on_stop(close) {
            if let Err(e) = tokio::task::spawn_blocking(close).await {
                tracing::error!(stage = %stage, error = %e, "Closing module failed");
            }
        }

        metrics::record_stage_ready(stage);
        Ok(module)
    }
}
