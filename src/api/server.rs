//! API server setup.
//!
//! # Responsibilities
//! - Bind the API listener when the module is constructed
//! - Build the Axum router with the agent gate, timeout and tracing layers
//! - Serve until the module is closed

use async_trait::async_trait;
use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::api::{agent, handlers};
use crate::config::{listen_addr, ApiConfig};
use crate::consensus::{ConsensusSet, StoreError};
use crate::gateway::Gateway;
use crate::lifecycle::{BoxError, Module, Server, ShutdownError, ShutdownGroup};
use crate::tpool::{PoolError, TransactionPool};

/// Errors from the API server and its handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to bind API address {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("API server is already serving")]
    AlreadyServing,

    #[error("API server failed: {0}")]
    Serve(#[source] std::io::Error),

    #[error("consensus unavailable: {0}")]
    Consensus(#[from] StoreError),

    #[error("transaction rejected: {0}")]
    Transaction(#[from] PoolError),

    #[error("malformed request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Consensus(_) | ApiError::Transaction(PoolError::Closed) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Transaction(PoolError::Duplicate(_)) => StatusCode::CONFLICT,
            ApiError::Transaction(PoolError::Full(_)) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Transaction(PoolError::Empty) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(handlers::ErrorBody {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub consensus: Arc<ConsensusSet>,
    pub gateway: Arc<Gateway>,
    pub tpool: Arc<TransactionPool>,
    pub fee: u32,
}

/// The serving module.
pub struct ApiServer {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    router: Router,
    group: ShutdownGroup,
}

impl ApiServer {
    /// Bind the API address. Requests are not accepted until [`Server::serve`].
    pub async fn new(
        config: &ApiConfig,
        state: AppState,
    ) -> Result<Self, ApiError> {
        let listener = TcpListener::bind(listen_addr(&config.bind_address))
            .await
            .map_err(|source| ApiError::Bind {
                address: config.bind_address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ApiError::Bind {
            address: config.bind_address.clone(),
            source,
        })?;

        tracing::info!(address = %local_addr, agent = %config.agent, "API listener bound");

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            router: Self::build_router(config, state),
            group: ShutdownGroup::new(),
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ApiConfig, state: AppState) -> Router {
        let agent: Arc<str> = Arc::from(config.agent.as_str());
        Router::new()
            .route("/version", get(handlers::get_version))
            .route("/fee", get(handlers::get_fee))
            .route("/consensus", get(handlers::get_consensus))
            .route("/gateway", get(handlers::get_gateway))
            .route("/tpool", get(handlers::get_tpool))
            .route("/tpool/transactions", post(handlers::post_transaction))
            .with_state(state)
            .layer(middleware::from_fn_with_state(agent, agent::require_agent))
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Module for ApiServer {
    fn name(&self) -> &'static str {
        "api"
    }

    fn close(&self) -> Result<(), ShutdownError> {
        self.group.stop()
    }
}

#[async_trait]
impl Server for ApiServer {
    async fn serve(&self) -> Result<(), BoxError> {
        let Ok(_guard) = self.group.acquire() else {
            tracing::debug!("API server closed before serving");
            return Ok(());
        };
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ApiError::AlreadyServing)?;

        let stop = self.group.stop_signal();
        tracing::info!(address = %self.local_addr, "API server accepting requests");
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move { stop.wait().await })
            .await
            .map_err(ApiError::Serve)?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainNetwork, ConsensusConfig, GatewayConfig, TransactionPoolConfig};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;

    async fn state(dir: &std::path::Path) -> AppState {
        let gw_config = GatewayConfig {
            rpc_addr: "127.0.0.1:0".to_string(),
            ..GatewayConfig::default()
        };
        let gateway = Arc::new(Gateway::new(&gw_config, &dir.join("gateway")).await.unwrap());
        let cs_config = ConsensusConfig {
            network: ChainNetwork::Dev,
            ..ConsensusConfig::default()
        };
        let consensus =
            Arc::new(ConsensusSet::new(&gateway, &dir.join("consensus"), &cs_config).unwrap());
        let tpool = Arc::new(
            TransactionPool::new(
                &consensus,
                &gateway,
                &dir.join("transactionpool"),
                &TransactionPoolConfig::default(),
            )
            .unwrap(),
        );
        AppState {
            consensus,
            gateway,
            tpool,
            fee: 150,
        }
    }

    fn router(state: AppState) -> Router {
        ApiServer::build_router(&ApiConfig::default(), state)
    }

    fn get(uri: &str, agent: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().uri(uri);
        if let Some(agent) = agent {
            req = req.header(header::USER_AGENT, agent);
        }
        req.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::USER_AGENT, "SIA-Agent")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn requests_without_agent_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(dir.path()).await);

        let res = app.clone().oneshot(get("/version", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app.oneshot(get("/version", Some("Mozilla/5.0"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn agent_requests_reach_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(dir.path()).await);

        let res = app
            .clone()
            .oneshot(get("/fee", Some("SIA-Agent")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res).await["fee"], 150);

        let res = app
            .oneshot(get("/consensus", Some("p2pool-cli SIA-Agent/1.0")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res).await["height"], 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn submitted_transactions_enter_the_pool() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path()).await;
        let tpool = Arc::clone(&state.tpool);
        let app = router(state);
        let body = serde_json::json!({ "payload": "deadbeef", "fee": 5 });

        let res = app
            .clone()
            .oneshot(post_json("/tpool/transactions", body.clone()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let expected = crate::tpool::Transaction {
            payload: vec![0xde, 0xad, 0xbe, 0xef],
            fee: 5,
        }
        .id();
        assert_eq!(json(res).await["id"], expected.to_string());
        assert_eq!(tpool.len(), 1);

        let res = app
            .clone()
            .oneshot(post_json("/tpool/transactions", body))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = app
            .oneshot(post_json(
                "/tpool/transactions",
                serde_json::json!({ "payload": "zz" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn submit_to_closed_pool_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path()).await;
        state.tpool.close().unwrap();

        let res = router(state)
            .oneshot(post_json(
                "/tpool/transactions",
                serde_json::json!({ "payload": "01" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn binds_hostname_address() {
        let dir = tempfile::tempdir().unwrap();
        let config = ApiConfig {
            bind_address: "localhost:0".to_string(),
            ..ApiConfig::default()
        };
        let server = ApiServer::new(&config, state(dir.path()).await).await.unwrap();
        assert!(server.local_addr().ip().is_loopback());
        server.close().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closed_consensus_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path()).await;
        state.consensus.close().unwrap();

        let res = router(state)
            .oneshot(get("/consensus", Some("SIA-Agent")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serve_after_close_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let config = ApiConfig {
            bind_address: "127.0.0.1:0".to_string(),
            ..ApiConfig::default()
        };
        let server = ApiServer::new(&config, state(dir.path()).await).await.unwrap();
        server.close().unwrap();
        server.serve().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_ends_serve() {
        let dir = tempfile::tempdir().unwrap();
        let config = ApiConfig {
            bind_address: "127.0.0.1:0".to_string(),
            ..ApiConfig::default()
        };
        let server = Arc::new(ApiServer::new(&config, state(dir.path()).await).await.unwrap());

        let serving = Arc::clone(&server);
        let handle = tokio::spawn(async move { serving.serve().await.map_err(|e| e.to_string()) });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let closing = Arc::clone(&server);
        tokio::task::spawn_blocking(move || closing.close()).await.unwrap().unwrap();
        handle.await.unwrap().unwrap();
    }
}
