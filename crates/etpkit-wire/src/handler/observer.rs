//! Observer lists for per-message-type event delivery.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{error, warn};

/// Result returned by an observer callback.
pub type ObserverResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Callback<E> = Arc<dyn Fn(&E) -> ObserverResult + Send + Sync>;

/// Handle returned by [`Observers::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered list of callbacks interested in one kind of event.
///
/// Delivery is synchronous and follows registration order. A callback that
/// returns an error or panics is logged and skipped; the remaining callbacks
/// still run.
pub struct Observers<E> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(ObserverId, Callback<E>)>>,
}

impl<E> Observers<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register a callback. It receives every event delivered after this call.
    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&E) -> ObserverResult + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every callback. Returns how many succeeded.
    pub fn notify(&self, event: &E) -> usize {
        // Snapshot so callbacks may subscribe or unsubscribe re-entrantly.
        let snapshot: Vec<(ObserverId, Callback<E>)> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut delivered = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(observer = id.0, error = %e, "Observer failed"),
                Err(_) => error!(observer = id.0, "Observer panicked"),
            }
        }
        delivered
    }
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("len", &self.len())
            .finish()
    }
}
