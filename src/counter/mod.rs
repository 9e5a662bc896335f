//! Viewer counting
//!
//! The live per-stream viewer count lives in a fast shared counter keyed by
//! stream. The counter is a derived cache: when it is unreachable the store
//! recounts open sessions from the durable viewer table instead of failing
//! the caller. Peak viewers ratchet upward only, with the durable row as the
//! authority.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::store::SharedStreamStore;

pub use self::memory::MemoryCounter;
pub use self::redis::RedisCounter;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter backend unavailable: {0}")]
    Backend(String),
}

impl From<::redis::RedisError> for CounterError {
    fn from(e: ::redis::RedisError) -> Self {
        CounterError::Backend(e.to_string())
    }
}

/// Minimal atomic-counter surface the viewer pipeline needs.
///
/// Implementations must make each operation atomic per key: two concurrent
/// `compare_and_max` calls for the same key may not both observe the old
/// value and settle on the lower candidate.
#[async_trait]
pub trait AtomicCounter: Send + Sync {
    async fn incr(&self, key: &str) -> Result<i64, CounterError>;

    /// Decrement clamped at zero; a spurious double-decrement stays at 0.
    async fn decr_floor(&self, key: &str) -> Result<i64, CounterError>;

    /// Current value; absent keys read as 0.
    async fn get(&self, key: &str) -> Result<i64, CounterError>;

    /// Raise the key to `candidate` if larger. Returns the resulting value.
    async fn compare_and_max(&self, key: &str, candidate: i64) -> Result<i64, CounterError>;

    async fn remove(&self, key: &str) -> Result<(), CounterError>;
}

/// Upper bound on any single fast-store call. A slow or partitioned
/// backend degrades to the durable fallback instead of stalling a handler.
const COUNTER_OP_TIMEOUT: Duration = Duration::from_secs(2);

async fn bounded<T>(
    fut: impl Future<Output = Result<T, CounterError>>,
) -> Result<T, CounterError> {
    match tokio::time::timeout(COUNTER_OP_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(CounterError::Backend("operation timed out".into())),
    }
}

fn viewers_key(stream_id: Uuid) -> String {
    format!("stream:{stream_id}:viewers")
}

fn peak_key(stream_id: Uuid) -> String {
    format!("stream:{stream_id}:peak")
}

/// Per-stream viewer counter with durable fallback and a peak ratchet.
///
/// Every counter failure is logged and degraded, never surfaced: the caller
/// always gets a count, sourced from the fast store when healthy and from an
/// open-session recount otherwise.
#[derive(Clone)]
pub struct ViewerCounterStore {
    counter: Arc<dyn AtomicCounter>,
    store: SharedStreamStore,
}

impl ViewerCounterStore {
    pub fn new(counter: Arc<dyn AtomicCounter>, store: SharedStreamStore) -> Self {
        Self { counter, store }
    }

    pub async fn increment(&self, stream_id: Uuid) -> i64 {
        match bounded(self.counter.incr(&viewers_key(stream_id))).await {
            Ok(count) => count,
            Err(e) => {
                warn!(%stream_id, error = %e, "viewer increment failed, recounting from store");
                self.recount(stream_id).await
            }
        }
    }

    pub async fn decrement(&self, stream_id: Uuid) -> i64 {
        match bounded(self.counter.decr_floor(&viewers_key(stream_id))).await {
            Ok(count) => count,
            Err(e) => {
                warn!(%stream_id, error = %e, "viewer decrement failed, recounting from store");
                self.recount(stream_id).await
            }
        }
    }

    pub async fn current(&self, stream_id: Uuid) -> i64 {
        match bounded(self.counter.get(&viewers_key(stream_id))).await {
            Ok(count) => count,
            Err(e) => {
                warn!(%stream_id, error = %e, "viewer count read failed, recounting from store");
                self.recount(stream_id).await
            }
        }
    }

    /// Raise the peak if `current` exceeds it; returns the resulting peak.
    ///
    /// The durable row is raised with a conditional update and is the
    /// authoritative value; the cached peak is advisory.
    pub async fn update_peak(&self, stream_id: Uuid, current: i64) -> i64 {
        let cached = match bounded(self.counter.compare_and_max(&peak_key(stream_id), current)).await
        {
            Ok(peak) => Some(peak),
            Err(e) => {
                warn!(%stream_id, error = %e, "cached peak update failed");
                None
            }
        };

        match self.store.raise_peak(stream_id, current).await {
            Ok(peak) => peak,
            Err(e) => {
                warn!(%stream_id, error = %e, "durable peak update failed");
                cached.unwrap_or(current)
            }
        }
    }

    /// Best-known peak, preferring the cache and falling back to the row.
    pub async fn peak(&self, stream_id: Uuid) -> i64 {
        match bounded(self.counter.get(&peak_key(stream_id))).await {
            Ok(peak) if peak > 0 => peak,
            Ok(_) | Err(_) => match self.store.get_stream(stream_id).await {
                Ok(Some(stream)) => stream.peak_viewers,
                Ok(None) => 0,
                Err(e) => {
                    warn!(%stream_id, error = %e, "peak fallback read failed");
                    0
                }
            },
        }
    }

    /// Drop the stream's counter keys once it has ended.
    pub async fn clear(&self, stream_id: Uuid) {
        for key in [viewers_key(stream_id), peak_key(stream_id)] {
            if let Err(e) = bounded(self.counter.remove(&key)).await {
                warn!(%stream_id, key = %key, error = %e, "failed to clear counter key");
            }
        }
    }

    async fn recount(&self, stream_id: Uuid) -> i64 {
        match self.store.count_watching(stream_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(%stream_id, error = %e, "durable recount failed, reporting 0");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewStream;
    use crate::store::{MemoryStreamStore, StreamStore};
    use chrono::Utc;

    /// Counter that always fails, to exercise the durable fallback.
    struct DownCounter;

    #[async_trait]
    impl AtomicCounter for DownCounter {
        async fn incr(&self, _key: &str) -> Result<i64, CounterError> {
            Err(CounterError::Backend("down".into()))
        }

        async fn decr_floor(&self, _key: &str) -> Result<i64, CounterError> {
            Err(CounterError::Backend("down".into()))
        }

        async fn get(&self, _key: &str) -> Result<i64, CounterError> {
            Err(CounterError::Backend("down".into()))
        }

        async fn compare_and_max(&self, _key: &str, _candidate: i64) -> Result<i64, CounterError> {
            Err(CounterError::Backend("down".into()))
        }

        async fn remove(&self, _key: &str) -> Result<(), CounterError> {
            Err(CounterError::Backend("down".into()))
        }
    }

    #[tokio::test]
    async fn counts_track_increments_and_floor_at_zero() {
        let store = Arc::new(MemoryStreamStore::new());
        let counters = ViewerCounterStore::new(Arc::new(MemoryCounter::new()), store.clone());
        let stream_id = Uuid::new_v4();

        assert_eq!(counters.increment(stream_id).await, 1);
        assert_eq!(counters.increment(stream_id).await, 2);
        assert_eq!(counters.decrement(stream_id).await, 1);
        assert_eq!(counters.decrement(stream_id).await, 0);
        // spurious double-disconnect must not underflow
        assert_eq!(counters.decrement(stream_id).await, 0);
        assert_eq!(counters.current(stream_id).await, 0);
    }

    #[tokio::test]
    async fn unavailable_counter_degrades_to_open_session_recount() {
        let store = Arc::new(MemoryStreamStore::new());
        let stream = store
            .create_stream(
                NewStream {
                    owner_id: Uuid::new_v4(),
                    title: "fallback".into(),
                    scheduled_at: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        for _ in 0..3 {
            store
                .open_viewer(stream.id, Uuid::new_v4(), Utc::now())
                .await
                .unwrap();
        }

        let counters = ViewerCounterStore::new(Arc::new(DownCounter), store.clone());
        assert_eq!(counters.current(stream.id).await, 3);
        assert_eq!(counters.increment(stream.id).await, 3);
    }

    #[tokio::test]
    async fn peak_ratchets_up_and_persists() {
        let store = Arc::new(MemoryStreamStore::new());
        let stream = store
            .create_stream(
                NewStream {
                    owner_id: Uuid::new_v4(),
                    title: "peak".into(),
                    scheduled_at: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let counters = ViewerCounterStore::new(Arc::new(MemoryCounter::new()), store.clone());
        assert_eq!(counters.update_peak(stream.id, 5).await, 5);
        // lower candidate leaves the ratchet alone
        assert_eq!(counters.update_peak(stream.id, 3).await, 5);
        assert_eq!(counters.peak(stream.id).await, 5);

        let row = store.get_stream(stream.id).await.unwrap().unwrap();
        assert_eq!(row.peak_viewers, 5);
    }
}
