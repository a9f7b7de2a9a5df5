use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::api::server::{ApiError, AppState};
use crate::gateway::PeerInfo;
use crate::tpool::Transaction;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct FeeInfo {
    /// Pool fee in units of 0.01%.
    pub fee: u32,
}

#[derive(Serialize)]
pub struct ConsensusInfo {
    pub height: u64,
    pub current_block: String,
    pub genesis_id: String,
}

#[derive(Serialize)]
pub struct GatewayInfo {
    pub net_address: String,
    pub peers: Vec<PeerInfo>,
    pub nodes: usize,
}

#[derive(Serialize)]
pub struct TpoolInfo {
    pub transactions: usize,
}

#[derive(Deserialize)]
pub struct SubmitTransaction {
    /// Hex-encoded transaction.
    pub payload: String,
    #[serde(default)]
    pub fee: u64,
}

#[derive(Serialize)]
pub struct TransactionAccepted {
    pub id: String,
}

pub async fn get_version() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn get_fee(State(state): State<AppState>) -> Json<FeeInfo> {
    Json(FeeInfo { fee: state.fee })
}

pub async fn get_consensus(State(state): State<AppState>) -> Result<Json<ConsensusInfo>, ApiError> {
    let height = state.consensus.height()?;
    let current_block = state.consensus.current_block()?;
    Ok(Json(ConsensusInfo {
        height,
        current_block: current_block.to_hex(),
        genesis_id: state.consensus.genesis_id().to_hex(),
    }))
}

pub async fn get_gateway(State(state): State<AppState>) -> Json<GatewayInfo> {
    Json(GatewayInfo {
        net_address: state.gateway.local_addr().to_string(),
        peers: state.gateway.peers(),
        nodes: state.gateway.nodes().len(),
    })
}

pub async fn get_tpool(State(state): State<AppState>) -> Json<TpoolInfo> {
    Json(TpoolInfo {
        transactions: state.tpool.len(),
    })
}

pub async fn post_transaction(
    State(state): State<AppState>,
    Json(body): Json<SubmitTransaction>,
) -> Result<Json<TransactionAccepted>, ApiError> {
    let payload = hex::decode(&body.payload)
        .map_err(|e| ApiError::BadRequest(format!("payload is not hex: {e}")))?;
    let id = state.tpool.accept_transaction(Transaction {
        payload,
        fee: body.fee,
    })?;
    Ok(Json(TransactionAccepted { id: id.to_string() }))
}
