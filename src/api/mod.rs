//! HTTP API.
//!
//! # Data Flow
//! ```text
//! request
//!     → TraceLayer → TimeoutLayer
//!     → agent.rs (User-Agent check, 400 on mismatch)
//!     → handlers.rs (views of consensus, gateway, tpool; transaction submit)
//! ```
//!
//! # Design Decisions
//! - The listener is bound at construction, requests are only accepted once
//!   `serve` runs, after every other module is up
//! - The only mutating route is transaction submission, which goes through
//!   the pool's own checks

pub mod agent;
pub mod handlers;
pub mod server;

pub use server::{ApiError, ApiServer, AppState};
