//! Checkpoint storage trait and types
//!
//! This module defines the CheckpointStore trait for backend-agnostic
//! checkpoint storage operations, plus shared types.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Checkpoint identifier for storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckpointKey {
    /// Namespace shared by every checkpoint of one engine configuration
    pub namespace: String,
    /// Watched collection name
    pub collection: String,
}

impl CheckpointKey {
    pub fn new(namespace: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            collection: collection.into(),
        }
    }

    /// Composite name used in log output, e.g. `logstash_since_events_20150227`.
    pub fn record_name(&self) -> String {
        format!("{}_{}", self.namespace, self.collection)
    }
}

impl std::fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.record_name())
    }
}

/// Checkpoint data stored in backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    pub namespace: String,
    pub collection: String,
    /// Encoded position (see `Checkpoint::to_cli_string`)
    pub position: String,
    /// Timestamp of the last write
    pub updated_at: DateTime<Utc>,
}

/// Trait for checkpoint storage operations.
///
/// This trait abstracts the storage backend for checkpoint operations,
/// allowing the same tail logic to work with:
/// - An embedded SQLite file (`SqliteStore`)
/// - Process memory (`MemoryStore`, for tests)
///
/// Writes are last-writer-wins; a single reader per store is assumed.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Create the backing table if it does not exist yet.
    ///
    /// Calling this on an already initialised store succeeds.
    async fn ensure_schema(&self) -> Result<()>;

    /// Store a checkpoint, replacing any previous value for the key.
    async fn store_checkpoint(&self, key: &CheckpointKey, position: String) -> Result<()>;

    /// Read a checkpoint from the storage backend.
    ///
    /// Returns None if the checkpoint doesn't exist.
    async fn read_checkpoint(&self, key: &CheckpointKey) -> Result<Option<StoredCheckpoint>>;

    /// List all checkpoints of a namespace, ordered by collection name.
    async fn list_checkpoints(&self, namespace: &str) -> Result<Vec<StoredCheckpoint>>;
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn ensure_schema(&self) -> Result<()> {
        (**self).ensure_schema().await
    }

    async fn store_checkpoint(&self, key: &CheckpointKey, position: String) -> Result<()> {
        (**self).store_checkpoint(key, position).await
    }

    async fn read_checkpoint(&self, key: &CheckpointKey) -> Result<Option<StoredCheckpoint>> {
        (**self).read_checkpoint(key).await
    }

    async fn list_checkpoints(&self, namespace: &str) -> Result<Vec<StoredCheckpoint>> {
        (**self).list_checkpoints(namespace).await
    }
}
