//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check addresses parse and value ranges are sane
//! - Turn listen specs (`host:port`, `:port`) into bindable addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: NodeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::NodeConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &NodeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_listen_addr(&mut errors, "gateway.rpc_addr", &config.gateway.rpc_addr);
    check_listen_addr(&mut errors, "api.bind_address", &config.api.bind_address);
    check_listen_addr(&mut errors, "pool.bind_address", &config.pool.bind_address);
    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if let Some(peers) = &config.gateway.bootstrap_peers {
        for (i, peer) in peers.iter().enumerate() {
            if !is_host_port(peer) {
                errors.push(ValidationError::new(
                    format!("gateway.bootstrap_peers[{}]", i),
                    format!("'{}' is not a host:port address", peer),
                ));
            }
        }
    }

    if config.gateway.dial_timeout_secs == 0 {
        errors.push(ValidationError::new("gateway.dial_timeout_secs", "must be greater than 0"));
    }
    if config.gateway.max_peers == 0 {
        errors.push(ValidationError::new("gateway.max_peers", "must be greater than 0"));
    }
    if config.tpool.max_transactions == 0 {
        errors.push(ValidationError::new("tpool.max_transactions", "must be greater than 0"));
    }
    if config.api.agent.trim().is_empty() {
        errors.push(ValidationError::new("api.agent", "must not be empty"));
    }
    if config.api.request_timeout_secs == 0 {
        errors.push(ValidationError::new("api.request_timeout_secs", "must be greater than 0"));
    }
    if config.pool.fee > 10_000 {
        errors.push(ValidationError::new("pool.fee", "must be at most 10000 (100%)"));
    }
    if config.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::new("shutdown_timeout_secs", "must be greater than 0"));
    }
    if config.data_dir.as_os_str().is_empty() {
        errors.push(ValidationError::new("data_dir", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{}' is not a valid socket address", value),
        ));
    }
}

fn check_listen_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    let valid = match value.rsplit_once(':') {
        Some(("", port)) => port.parse::<u16>().is_ok(),
        Some(_) => is_host_port(value),
        None => false,
    };
    if !valid {
        errors.push(ValidationError::new(
            field,
            format!("'{}' is not a host:port or :port address", value),
        ));
    }
}

/// Bindable form of a listen spec: `:port` means every interface.
pub fn listen_addr(spec: &str) -> String {
    match spec.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => spec.to_string(),
    }
}

fn is_host_port(value: &str) -> bool {
    match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
