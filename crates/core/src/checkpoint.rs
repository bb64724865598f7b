//! Run checkpoints: per-thread snapshots of run state.
//!
//! The orchestration loop saves a checkpoint after every state transition so
//! that the thread's in-flight messages (assistant tool requests, tool
//! results) are observable while the run is alive. Stores must bound their
//! own growth; see `InMemoryCheckpointStore` in the agent crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::{Message, ThreadId};

/// A snapshot of one thread's run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,

    /// Conversation so far, including in-flight tool exchanges
    pub messages: Vec<Message>,

    /// Reasoning passes completed in the run that wrote this snapshot
    pub iterations: u32,

    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(thread_id: ThreadId, messages: Vec<Message>, iterations: u32) -> Self {
        Self {
            thread_id,
            messages,
            iterations,
            updated_at: Utc::now(),
        }
    }
}

/// Storage for checkpoints, keyed by thread id.
///
/// Concurrent runs on one thread overwrite each other's snapshots; callers
/// are expected to run at most one run per thread at a time.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StoreError>;

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), StoreError>;

    async fn remove(&self, thread_id: &ThreadId) -> Result<bool, StoreError>;

    /// Number of threads currently held.
    async fn len(&self) -> Result<usize, StoreError>;
}
