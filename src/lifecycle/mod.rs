//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → gateway → consensus set (integrity gate) → transaction pool
//!     → API server → bootstrap dials (bootstrap.rs) → serve
//!
//! Shutdown (shutdown.rs, group.rs):
//!     Trigger → process group stops → module hooks run newest first
//!     → each module's group drains its in-flight work → start() returns
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     Second signal or timeout → forced exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: every module depends on the one before it
//! - Ordered shutdown: reverse of startup, via hook registration order
//! - Each module owns its own `ShutdownGroup`; the node owns one more

pub mod bootstrap;
pub mod group;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use bootstrap::{BootstrapJoiner, PeerDialer, BOOTSTRAP_DIALS, BOOTSTRAP_PEERS};
pub use group::{ShutdownError, ShutdownGroup, StopSignal, WorkGuard};
pub use shutdown::Shutdown;
pub use startup::{BoxError, Module, ModuleFactory, Node, NodeError, NodeStatus, Server, Stage};
