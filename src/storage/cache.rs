//! Single-flight TTL cache for inventory sweeps.
//!
//! A backend sweep touches every node; running two of them concurrently
//! doubles the load for an identical answer. The cache serializes refreshes
//! through a fetch lock: whoever arrives while a sweep is in flight waits on
//! the lock and then finds the freshly stored value. Failed sweeps store
//! nothing, so the next caller retries from scratch.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Entry<T> {
    value: T,
    stored_at: Instant,
}

/// TTL cache with single-flight refresh semantics.
pub struct SingleFlightCache<T> {
    ttl: Duration,
    slot: Mutex<Option<Entry<T>>>,
    /// Held for the duration of one sweep; waiters share its result via the
    /// slot rather than sweeping again.
    fetch: Mutex<()>,
}

impl<T: Clone> SingleFlightCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
            fetch: Mutex::new(()),
        }
    }

    /// Drop any cached value.
    pub async fn invalidate(&self) {
        self.slot.lock().await.take();
    }

    /// Return the cached value when fresh, otherwise run `fetch` with
    /// single-flight protection. `force` clears the cache before checking.
    pub async fn get_or_fetch<F, Fut>(&self, force: bool, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if force {
            self.invalidate().await;
        }

        if let Some(value) = self.fresh().await {
            return Ok(value);
        }

        let _flight = self.fetch.lock().await;

        // A sweep that finished while we waited already stored its result.
        if let Some(value) = self.fresh().await {
            return Ok(value);
        }

        let value = fetch().await?;
        *self.slot.lock().await = Some(Entry {
            value: value.clone(),
            stored_at: Instant::now(),
        });
        Ok(value)
    }

    async fn fresh(&self) -> Option<T> {
        let slot = self.slot.lock().await;
        slot.as_ref()
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }
}
