//! Process-wide shutdown coordination.

use std::sync::Arc;
use tokio::sync::watch;

use crate::lifecycle::group::{ShutdownError, ShutdownGroup, StopSignal};

/// Coordinator for graceful shutdown of the whole node.
///
/// Wraps the process-level [`ShutdownGroup`]: every module registers its own
/// `close` as a hook here, so triggering fans out to all of them, newest
/// module first. Clones share the same state.
#[derive(Clone)]
pub struct Shutdown {
    group: ShutdownGroup,
    /// Flipped once the group has stopped and drained.
    complete: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (complete, _) = watch::channel(false);
        Self {
            group: ShutdownGroup::new(),
            complete: Arc::new(complete),
        }
    }

    /// The process-level group modules attach their hooks to.
    pub fn group(&self) -> &ShutdownGroup {
        &self.group
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> StopSignal {
        self.group.stop_signal()
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        self.group.is_stopped()
    }

    /// Trigger shutdown and wait for it to finish.
    ///
    /// Safe to call from any number of tasks: the first caller runs the
    /// teardown on the blocking pool, everyone else waits for it.
    pub async fn trigger(&self) {
        let group = self.group.clone();
        match tokio::task::spawn_blocking(move || group.stop()).await {
            Ok(Ok(())) => {
                tracing::info!("Shutdown complete");
                self.complete.send_replace(true);
            }
            Ok(Err(ShutdownError::AlreadyStopped)) => self.completed().await,
            Err(e) => {
                tracing::error!(error = %e, "Shutdown task failed");
                self.complete.send_replace(true);
            }
        }
    }

    /// Resolve once a triggered shutdown has fully drained.
    pub async fn completed(&self) {
        let mut rx = self.complete.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
