//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use p2pool_node::config::{ChainNetwork, NodeConfig};
use p2pool_node::lifecycle::{
    BoxError, Module, ModuleFactory, NodeStatus, PeerDialer, Server, ShutdownError,
    ShutdownGroup, Stage,
};

/// Reserve a free local port by binding and releasing it.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Node configuration rooted in `dir`, listening on loopback only, with
/// bootstrapping disabled.
pub fn node_config(dir: &Path) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.data_dir = dir.to_path_buf();
    config.gateway.rpc_addr = "127.0.0.1:0".to_string();
    config.gateway.bootstrap_peers = Some(vec![]);
    config.gateway.dial_timeout_secs = 1;
    config.api.bind_address = format!("127.0.0.1:{}", free_port());
    config.consensus.network = ChainNetwork::Dev;
    config.shutdown_timeout_secs = 5;
    config
}

/// Wait until the node reports a terminal or running status.
pub async fn wait_settled(status: &mut watch::Receiver<NodeStatus>) -> NodeStatus {
    let settled = tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|s| {
            matches!(
                s,
                NodeStatus::Running | NodeStatus::FailedAtStage(_) | NodeStatus::Stopped
            )
        }),
    )
    .await
    .expect("node did not settle in time")
    .expect("status channel closed");
    *settled
}

/// Ordered record of what the mock modules did.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }
}

/// A module that records its construction and close.
pub struct MockModule {
    name: &'static str,
    events: Events,
    group: ShutdownGroup,
}

impl MockModule {
    fn new(name: &'static str, events: &Events) -> Self {
        events.push(format!("build {name}"));
        Self {
            name,
            events: events.clone(),
            group: ShutdownGroup::new(),
        }
    }
}

impl Module for MockModule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn close(&self) -> Result<(), ShutdownError> {
        self.group.stop()?;
        self.events.push(format!("close {}", self.name));
        Ok(())
    }
}

#[async_trait]
impl PeerDialer for MockModule {
    async fn connect(&self, address: &str) -> Result<(), BoxError> {
        self.events.push(format!("dial {address}"));
        Err("mock network never connects".into())
    }
}

#[async_trait]
impl Server for MockModule {
    async fn serve(&self) -> Result<(), BoxError> {
        let Ok(_guard) = self.group.acquire() else {
            return Ok(());
        };
        self.events.push("serve");
        self.group.stop_signal().wait().await;
        Ok(())
    }
}

/// Module factory whose behavior is scripted per stage.
#[derive(Clone, Default)]
pub struct MockFactory {
    pub events: Events,
    /// Stage whose construction fails.
    pub fail_at: Option<Stage>,
    /// Delay before the chain stage finishes building.
    pub chain_delay: Option<Duration>,
}

impl MockFactory {
    pub fn failing_at(stage: Stage) -> Self {
        Self {
            fail_at: Some(stage),
            ..Self::default()
        }
    }

    fn build(&self, stage: Stage, name: &'static str) -> Result<Arc<MockModule>, BoxError> {
        if self.fail_at == Some(stage) {
            self.events.push(format!("fail {name}"));
            return Err(format!("{name} refused to start").into());
        }
        Ok(Arc::new(MockModule::new(name, &self.events)))
    }
}

#[async_trait]
impl ModuleFactory for MockFactory {
    type Network = MockModule;
    type Chain = MockModule;
    type Pool = MockModule;
    type Server = MockModule;

    async fn network(&self, _config: &NodeConfig) -> Result<Arc<MockModule>, BoxError> {
        self.build(Stage::Network, "network")
    }

    async fn chain(
        &self,
        _config: &NodeConfig,
        _network: Arc<MockModule>,
    ) -> Result<Arc<MockModule>, BoxError> {
        if let Some(delay) = self.chain_delay {
            tokio::time::sleep(delay).await;
        }
        self.build(Stage::ChainState, "chain")
    }

    async fn pool(
        &self,
        _config: &NodeConfig,
        _chain: Arc<MockModule>,
        _network: Arc<MockModule>,
    ) -> Result<Arc<MockModule>, BoxError> {
        self.build(Stage::TransactionPool, "pool")
    }

    async fn server(
        &self,
        _config: &NodeConfig,
        _chain: Arc<MockModule>,
        _network: Arc<MockModule>,
        _pool: Arc<MockModule>,
    ) -> Result<Arc<MockModule>, BoxError> {
        self.build(Stage::Serving, "server")
    }
}
