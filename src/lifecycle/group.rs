//! Per-module shutdown coordination.
//!
//! # Responsibilities
//! - Count in-flight units of work owned by a module
//! - Broadcast a one-shot stop signal to that work
//! - Run cleanup hooks (close listeners, flush state) when the module stops
//!
//! # Design Decisions
//! - A `Default` group is ready to use; the signal channel is created on first access
//! - Work is tracked with RAII guards so every exit path releases its slot
//! - Hooks run newest-first, after the signal and outside the lock
//! - A panicking hook is logged and skipped; the rest still run and the
//!   drain still happens
//! - `stop` blocks the calling thread until drained; async code drives it
//!   from `spawn_blocking`

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

/// Errors returned by [`ShutdownGroup`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ShutdownError {
    /// `stop` has already been called on this group.
    #[error("shutdown group already stopped")]
    AlreadyStopped,
}

type Hook = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Inner {
    /// Lazily created so a defaulted group needs no constructor.
    signal: OnceLock<watch::Sender<bool>>,
    /// Guards the stopped transition and the hook list.
    hooks: Mutex<Vec<Hook>>,
    /// In-flight work; never locked together with `hooks` by `stop`.
    active: Mutex<usize>,
    drained: Condvar,
}

impl Inner {
    fn signal(&self) -> &watch::Sender<bool> {
        self.signal.get_or_init(|| watch::channel(false).0)
    }

    fn is_stopped(&self) -> bool {
        *self.signal().borrow()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_hook(hook: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        tracing::error!(panic = message, "Shutdown hook panicked");
    }
}

/// Tracks in-flight work for one module and coordinates its shutdown.
///
/// Cloning is cheap and every clone refers to the same group, so the owning
/// module can hand clones to the tasks it spawns.
#[derive(Clone, Default)]
pub struct ShutdownGroup {
    inner: Arc<Inner>,
}

impl ShutdownGroup {
    /// Create a new, running group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one unit of in-flight work.
    ///
    /// Fails once the group has been stopped; the caller must then skip the
    /// work it meant to protect. The returned guard releases the slot when
    /// dropped.
    pub fn acquire(&self) -> Result<WorkGuard, ShutdownError> {
        let _hooks = lock(&self.inner.hooks);
        if self.inner.is_stopped() {
            return Err(ShutdownError::AlreadyStopped);
        }
        *lock(&self.inner.active) += 1;
        Ok(WorkGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Handle that resolves once the group is stopped.
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal {
            rx: self.inner.signal().subscribe(),
        }
    }

    /// Non-blocking check of the stop signal.
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Number of guards currently outstanding.
    pub fn active_count(&self) -> usize {
        *lock(&self.inner.active)
    }

    /// Register a cleanup hook.
    ///
    /// If the group is already stopped the hook runs right here, before this
    /// call returns.
    pub fn on_stop<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(hook) = self.try_on_stop(hook) {
            run_hook(hook);
        }
    }

    /// Register a cleanup hook, handing it back if the group is already
    /// stopped so the caller decides where it runs.
    pub fn try_on_stop<F>(&self, hook: F) -> Result<(), F>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hooks = lock(&self.inner.hooks);
        if self.inner.is_stopped() {
            return Err(hook);
        }
        hooks.push(Box::new(hook));
        Ok(())
    }

    /// Stop the group.
    ///
    /// Broadcasts the stop signal, runs every registered hook in reverse
    /// registration order and then blocks until all outstanding guards are
    /// released. Only the first call does any of this; later calls return
    /// [`ShutdownError::AlreadyStopped`].
    pub fn stop(&self) -> Result<(), ShutdownError> {
        let hooks = {
            let mut hooks = lock(&self.inner.hooks);
            if self.inner.is_stopped() {
                return Err(ShutdownError::AlreadyStopped);
            }
            self.inner.signal().send_replace(true);
            std::mem::take(&mut *hooks)
        };

        tracing::trace!(hooks = hooks.len(), "Running shutdown hooks");
        for hook in hooks.into_iter().rev() {
            run_hook(hook);
        }

        let mut active = lock(&self.inner.active);
        while *active > 0 {
            tracing::trace!(active = *active, "Waiting for in-flight work to drain");
            active = self
                .inner
                .drained
                .wait(active)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }
}

impl fmt::Debug for ShutdownGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownGroup")
            .field("stopped", &self.is_stopped())
            .field("active", &self.active_count())
            .finish()
    }
}

/// One unit of in-flight work registered with a [`ShutdownGroup`].
///
/// Dropping the guard releases it.
#[must_use = "dropping the guard releases the work slot immediately"]
pub struct WorkGuard {
    inner: Arc<Inner>,
}

impl WorkGuard {
    /// Release the slot explicitly.
    pub fn release(self) {}
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        let mut active = lock(&self.inner.active);
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.inner.drained.notify_all();
        }
    }
}

impl fmt::Debug for WorkGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WorkGuard")
    }
}

/// Read-only view of a group's stop signal.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Whether the signal has fired.
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the group stops. Meant for use inside `tokio::select!`.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // An Err means the group itself is gone, which is as final as a stop.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}
