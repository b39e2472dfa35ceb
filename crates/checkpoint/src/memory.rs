//! In-memory checkpoint storage, used by tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::store::{CheckpointKey, CheckpointStore, StoredCheckpoint};

/// Process-local implementation of CheckpointStore trait.
///
/// Writes can be made to fail on demand to exercise storage-error paths.
#[derive(Default)]
pub struct MemoryStore {
    checkpoints: Mutex<BTreeMap<CheckpointKey, StoredCheckpoint>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `store_checkpoint` return an error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<CheckpointKey, StoredCheckpoint>>> {
        self.checkpoints
            .lock()
            .map_err(|_| anyhow!("memory checkpoint store lock poisoned"))
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn store_checkpoint(&self, key: &CheckpointKey, position: String) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("simulated checkpoint write failure for {key}");
        }
        let stored = StoredCheckpoint {
            namespace: key.namespace.clone(),
            collection: key.collection.clone(),
            position,
            updated_at: Utc::now(),
        };
        self.lock()?.insert(key.clone(), stored);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_checkpoint(&self, key: &CheckpointKey) -> Result<Option<StoredCheckpoint>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn list_checkpoints(&self, namespace: &str) -> Result<Vec<StoredCheckpoint>> {
        Ok(self
            .lock()?
            .values()
            .filter(|c| c.namespace == namespace)
            .cloned()
            .collect())
    }
}
