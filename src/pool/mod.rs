//! Miner-facing pool listener.
//!
//! # Responsibilities
//! - Bind the pool address before any node module is built
//! - Answer miners' `/fee` and `/version` queries
//! - Close together with the node
//!
//! # Data Flow
//! ```text
//! main
//!     → PoolServer::bind(pool.bind_address)
//!     → close_on(node shutdown) → spawned serve()
//!
//! node shutdown
//!     → hook closes the pool group → serve() returns
//! ```
//!
//! # Design Decisions
//! - Not one of the node's stages: miners get an early bind failure, and the
//!   listener's close is registered first so it runs after every module
//! - No User-Agent gate; miners are not Sia clients

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{self, FeeInfo};
use crate::config::{listen_addr, PoolConfig};
use crate::lifecycle::{Module, Shutdown, ShutdownError, ShutdownGroup};

/// Errors from the pool listener.
#[derive(Debug, Error)]
pub enum PoolServerError {
    #[error("failed to bind pool address {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pool listener is already serving")]
    AlreadyServing,

    #[error("pool listener failed: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Clone)]
struct PoolState {
    fee: u32,
}

async fn get_fee(State(state): State<PoolState>) -> Json<FeeInfo> {
    Json(FeeInfo { fee: state.fee })
}

/// The listener miners talk to.
pub struct PoolServer {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    router: Router,
    group: ShutdownGroup,
}

impl PoolServer {
    /// Bind the pool address. Requests are not answered until [`PoolServer::serve`].
    pub async fn bind(config: &PoolConfig) -> Result<Self, PoolServerError> {
        let bind_err = |source| PoolServerError::Bind {
            address: config.bind_address.clone(),
            source,
        };
        let listener = TcpListener::bind(listen_addr(&config.bind_address))
            .await
            .map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        tracing::info!(address = %local_addr, fee = config.fee, "Pool listener bound");

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            router: Self::build_router(config.fee),
            group: ShutdownGroup::new(),
        })
    }

    fn build_router(fee: u32) -> Router {
        Router::new()
            .route("/fee", get(get_fee))
            .route("/version", get(handlers::get_version))
            .with_state(PoolState { fee })
            .layer(TraceLayer::new_for_http())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close this listener when `shutdown` runs.
    pub fn close_on(self: &Arc<Self>, shutdown: &Shutdown) {
        let closing = Arc::clone(self);
        shutdown.group().on_stop(move || {
            tracing::info!("Closing pool listener");
            if let Err(e) = closing.close() {
                tracing::debug!(error = %e, "Pool listener was already closed");
            }
        });
    }

    /// Answer miner requests until closed.
    pub async fn serve(&self) -> Result<(), PoolServerError> {
        let Ok(_guard) = self.group.acquire() else {
            tracing::debug!("Pool listener closed before serving");
            return Ok(());
        };
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(PoolServerError::AlreadyServing)?;

        let stop = self.group.stop_signal();
        tracing::info!(address = %self.local_addr, "Listening for miner requests");
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move { stop.wait().await })
            .await
            .map_err(PoolServerError::Serve)?;

        tracing::info!("Pool listener stopped");
        Ok(())
    }
}

impl Module for PoolServer {
    fn name(&self) -> &'static str {
        "pool listener"
    }

    fn close(&self) -> Result<(), ShutdownError> {
        self.group.stop()
    }
}
