//! In-process atomic counter map

use async_trait::async_trait;
use dashmap::DashMap;

use super::{AtomicCounter, CounterError};

/// Dashmap-backed counter. Entry guards lock per key, so every operation is
/// atomic with respect to other operations on the same key.
#[derive(Default)]
pub struct MemoryCounter {
    map: DashMap<String, i64>,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AtomicCounter for MemoryCounter {
    async fn incr(&self, key: &str) -> Result<i64, CounterError> {
        let mut entry = self.map.entry(key.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn decr_floor(&self, key: &str) -> Result<i64, CounterError> {
        let mut entry = self.map.entry(key.to_string()).or_insert(0);
        *entry = (*entry - 1).max(0);
        Ok(*entry)
    }

    async fn get(&self, key: &str) -> Result<i64, CounterError> {
        Ok(self.map.get(key).map(|v| *v).unwrap_or(0))
    }

    async fn compare_and_max(&self, key: &str, candidate: i64) -> Result<i64, CounterError> {
        let mut entry = self.map.entry(key.to_string()).or_insert(0);
        if candidate > *entry {
            *entry = candidate;
        }
        Ok(*entry)
    }

    async fn remove(&self, key: &str) -> Result<(), CounterError> {
        self.map.remove(key);
        Ok(())
    }
}
