//! Checkpoint model and storage abstraction

use crate::error::ProcessorResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Identity of a processor: the namespace / event hub / consumer group triple
/// that scopes every checkpoint it reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessorIdentity {
    pub fully_qualified_namespace: String,
    pub event_hub_name: String,
    pub consumer_group: String,
}

impl ProcessorIdentity {
    pub fn new(
        fully_qualified_namespace: impl Into<String>,
        event_hub_name: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            fully_qualified_namespace: fully_qualified_namespace.into(),
            event_hub_name: event_hub_name.into(),
            consumer_group: consumer_group.into(),
        }
    }

    /// Blob name holding the checkpoint of one partition.
    ///
    /// Same layout as the Event Hubs SDK blob checkpoint stores:
    /// `{namespace}/{event hub}/{consumer group}/checkpoint/{partition}`, lowercase.
    pub fn checkpoint_blob_name(&self, partition_id: &str) -> String {
        format!(
            "{}/{}/{}/checkpoint/{}",
            self.fully_qualified_namespace,
            self.event_hub_name,
            self.consumer_group,
            partition_id
        )
        .to_lowercase()
    }
}

/// Last processed position of one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub identity: ProcessorIdentity,
    pub partition_id: String,
    /// Sequence number of the last processed event; resume starts after it
    pub sequence_number: i64,
    /// Byte offset of that event, present only in checkpoints written by the
    /// Event Hubs SDKs. Never compared against source positions.
    pub offset: Option<i64>,
}

/// Durable storage for partition checkpoints.
///
/// Implementations should be idempotent: writing the same checkpoint twice is harmless.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read the checkpoint of a partition, `None` when nothing was stored yet.
    async fn get_checkpoint(
        &self,
        identity: &ProcessorIdentity,
        partition_id: &str,
    ) -> ProcessorResult<Option<Checkpoint>>;

    /// Create or overwrite the checkpoint of a partition.
    async fn update_checkpoint(&self, checkpoint: &Checkpoint) -> ProcessorResult<()>;
}

/// Process-local checkpoint store, lost on restart
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of partitions with a stored checkpoint
    pub fn len(&self) -> usize {
        self.checkpoints.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get_checkpoint(
        &self,
        identity: &ProcessorIdentity,
        partition_id: &str,
    ) -> ProcessorResult<Option<Checkpoint>> {
        let key = identity.checkpoint_blob_name(partition_id);
        Ok(self
            .checkpoints
            .lock()
            .ok()
            .and_then(|c| c.get(&key).cloned()))
    }

    async fn update_checkpoint(&self, checkpoint: &Checkpoint) -> ProcessorResult<()> {
        let key = checkpoint
            .identity
            .checkpoint_blob_name(&checkpoint.partition_id);
        if let Ok(mut checkpoints) = self.checkpoints.lock() {
            checkpoints.insert(key, checkpoint.clone());
        }
        Ok(())
    }
}
