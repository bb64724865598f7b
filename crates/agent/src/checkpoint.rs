//! In-memory checkpoint store with idle expiry and a thread cap.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use toolrelay_config::CheckpointConfig;
use toolrelay_core::checkpoint::{Checkpoint, CheckpointStore};
use toolrelay_core::error::StoreError;
use toolrelay_core::message::ThreadId;
use tracing::debug;

/// Holds the latest checkpoint per thread.
///
/// Entries idle longer than `ttl` are dropped on the next write or read of
/// any thread. When a new thread would exceed `max_threads`, the
/// least-recently-written threads are evicted first.
pub struct InMemoryCheckpointStore {
    entries: RwLock<HashMap<ThreadId, Entry>>,
    ttl: Duration,
    max_threads: usize,
}

struct Entry {
    checkpoint: Checkpoint,
    touched: Instant,
}

impl InMemoryCheckpointStore {
    pub fn new(ttl: Duration, max_threads: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_threads: max_threads.max(1),
        }
    }

    pub fn from_config(config: &CheckpointConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_threads)
    }

    fn expire(&self, entries: &mut HashMap<ThreadId, Entry>, now: Instant) {
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.touched) < self.ttl);
        let expired = before - entries.len();
        if expired > 0 {
            debug!(expired, "Expired idle checkpoints");
        }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::from_config(&CheckpointConfig::default())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(thread_id)
            .filter(|e| Instant::now().duration_since(e.touched) < self.ttl)
            .map(|e| e.checkpoint.clone()))
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        self.expire(&mut entries, now);

        if !entries.contains_key(&checkpoint.thread_id) {
            while entries.len() >= self.max_threads {
                let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.touched)
                    .map(|(id, _)| id.clone())
                else {
                    break;
                };
                debug!(thread_id = %oldest, "Evicting checkpoint to stay under thread cap");
                entries.remove(&oldest);
            }
        }

        entries.insert(
            checkpoint.thread_id.clone(),
            Entry {
                checkpoint,
                touched: now,
            },
        );
        Ok(())
    }

    async fn remove(&self, thread_id: &ThreadId) -> Result<bool, StoreError> {
        Ok(self.entries.write().await.remove(thread_id).is_some())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        self.expire(&mut entries, now);
        Ok(entries.len())
    }
}
