//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT/SIGTERM (Ctrl+C elsewhere)
//! - Translate the first signal into a graceful shutdown
//! - Force the process down on a second signal or when draining overruns
//!   its deadline

use std::time::Duration;
use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::Shutdown;

/// Wait for the next termination signal and return its name.
pub async fn shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
    }
}

/// Spawn the task that turns termination signals into a node shutdown.
///
/// The shutdown itself runs to completion in the background; this task only
/// decides whether to wait for it or to exit early.
pub fn spawn_signal_handler(shutdown: Shutdown, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(name) => tracing::info!(signal = name, "Caught stop signal, quitting"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handlers");
                return;
            }
        }

        let draining = shutdown.clone();
        tokio::spawn(async move { draining.trigger().await });

        tokio::select! {
            _ = shutdown.completed() => {}
            _ = shutdown_signal() => {
                tracing::warn!("Second stop signal received, forcing exit");
                std::process::exit(1);
            }
            _ = tokio::time::sleep(timeout) => {
                tracing::error!(timeout_secs = timeout.as_secs(), "Shutdown timed out, forcing exit");
                std::process::exit(1);
            }
        }
    })
}
