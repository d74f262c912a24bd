//! A single cancel token per active turn (spec.md §5).
//!
//! Plain `Arc<AtomicBool>` + `tokio::sync::Notify` rather than a channel:
//! firing must be idempotent and checkable synchronously from many call
//! sites (provider adapters, tool executors, hook handlers) without each
//! holding a receiver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct CancelSignal {
    fired: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Fire the signal. Idempotent: subsequent calls are no-ops.
    pub fn fire(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Resolves once `fire()` has been called. Useful in `tokio::select!`
    /// alongside a provider stream read or tool execute future.
    pub async fn cancelled(&self) {
        // Register as a waiter before checking the flag: `Notify` tracks a
        // `notify_waiters` generation at the moment `notified()` is created,
        // so a `fire()` landing between this line and the `.await` below is
        // still observed instead of being lost.
        let notified = self.notify.notified();
        if self.is_fired() {
            return;
        }
        notified.await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
