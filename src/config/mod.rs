//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CLI overrides (main.rs)
//!     → NodeConfig (validated, immutable)
//!     → handed to the node and each module it constructs
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::ApiConfig;
pub use schema::ChainNetwork;
pub use schema::ConsensusConfig;
pub use schema::GatewayConfig;
pub use schema::GenesisCheck;
pub use schema::NodeConfig;
pub use schema::ObservabilityConfig;
pub use schema::PoolConfig;
pub use schema::TransactionPoolConfig;
pub use validation::{listen_addr, validate_config, ValidationError};
