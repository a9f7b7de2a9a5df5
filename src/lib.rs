//! p2pool-node library: module lifecycle, shutdown coordination and the
//! modules of a layered pool daemon.

pub mod api;
pub mod config;
pub mod consensus;
pub mod daemon;
pub mod gateway;
pub mod lifecycle;
pub mod observability;
pub mod persist;
pub mod pool;
pub mod tpool;

pub use config::NodeConfig;
pub use daemon::DaemonModules;
pub use lifecycle::{Node, NodeError, Shutdown, ShutdownGroup};
