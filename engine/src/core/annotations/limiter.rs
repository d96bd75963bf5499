//! Per-Shard Concurrency Limiter
//!
//! One semaphore per shard key, created up front for the fixed key range.
//! Acquiring a permit for one shard never touches another shard's state.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::{CoreError, CoreResult, ShardKey};

/// Bounds in-flight annotation calls per shard key
#[derive(Debug)]
pub struct ShardLimiter {
    /// Semaphore per shard, indexed by shard key
    shards: Vec<Arc<Semaphore>>,
    /// Permits per shard
    max_per_key: usize,
}

impl ShardLimiter {
    /// Creates a limiter for `key_range_size` shards
    pub fn new(key_range_size: u32, max_per_key: usize) -> CoreResult<Self> {
        if key_range_size == 0 {
            return Err(CoreError::InvalidConfig(
                "keyRangeSize must be greater than 0".to_string(),
            ));
        }
        if max_per_key == 0 {
            return Err(CoreError::InvalidConfig(
                "maxConcurrentPerKey must be greater than 0".to_string(),
            ));
        }

        let shards = (0..key_range_size)
            .map(|_| Arc::new(Semaphore::new(max_per_key)))
            .collect();

        Ok(Self {
            shards,
            max_per_key,
        })
    }

    /// Number of shards
    pub fn key_range_size(&self) -> u32 {
        self.shards.len() as u32
    }

    /// Permits per shard
    pub fn max_per_key(&self) -> usize {
        self.max_per_key
    }

    fn shard(&self, shard_key: ShardKey) -> CoreResult<&Arc<Semaphore>> {
        self.shards.get(shard_key as usize).ok_or_else(|| {
            CoreError::Internal(format!(
                "Shard key {} outside key range {}",
                shard_key,
                self.shards.len()
            ))
        })
    }

    /// Waits for a free slot on the shard
    ///
    /// The slot is released when the permit is dropped.
    pub async fn acquire(&self, shard_key: ShardKey) -> CoreResult<OwnedSemaphorePermit> {
        let semaphore = Arc::clone(self.shard(shard_key)?);
        semaphore
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Internal(format!("Shard {} limiter closed", shard_key)))
    }

    /// Calls currently in flight on a shard
    pub fn in_flight(&self, shard_key: ShardKey) -> usize {
        self.shard(shard_key)
            .map(|s| self.max_per_key - s.available_permits())
            .unwrap_or(0)
    }

    /// Closes every shard; pending and future acquires fail
    ///
    /// Permits already handed out stay valid until dropped.
    pub fn close(&self) {
        for shard in &self.shards {
            shard.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shards.iter().all(|s| s.is_closed())
    }
}
