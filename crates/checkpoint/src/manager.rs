//! Typed checkpoint access for one namespace.

use anyhow::Context;

use crate::{Checkpoint, CheckpointConfig, CheckpointKey, CheckpointStore, SqliteStore};

/// Manager for reading and writing typed checkpoints.
///
/// Wraps a `CheckpointStore` and a namespace so callers only deal with
/// collection names and their position type.
///
/// # Example
///
/// ```rust,ignore
/// use checkpoint::{CheckpointConfig, CheckpointManager};
///
/// let manager = CheckpointManager::open_sqlite(&CheckpointConfig::default()).await?;
///
/// // Save a checkpoint
/// manager.emit_checkpoint("events_20150227", &cursor).await?;
///
/// // Load a checkpoint
/// let loaded: Option<Cursor> = manager.read_checkpoint("events_20150227").await?;
/// ```
pub struct CheckpointManager<S> {
    store: S,
    namespace: String,
}

impl CheckpointManager<SqliteStore> {
    /// Open the SQLite file described by `config` and make sure its table exists.
    pub async fn open_sqlite(config: &CheckpointConfig) -> anyhow::Result<Self> {
        let store = SqliteStore::open(config.path())?;
        let manager = Self::new(store, config.namespace.clone());
        manager.ensure_schema().await?;
        Ok(manager)
    }
}

impl<S: CheckpointStore> CheckpointManager<S> {
    pub fn new(store: S, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Storage key for a collection in this namespace.
    pub fn key(&self, collection: &str) -> CheckpointKey {
        CheckpointKey::new(self.namespace.clone(), collection)
    }

    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        self.store.ensure_schema().await
    }

    /// Read and decode the checkpoint of a collection.
    ///
    /// `Ok(None)` means no checkpoint was ever written for it, which is
    /// distinct from any position value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the stored position cannot be
    /// decoded as `C`.
    pub async fn read_checkpoint<C: Checkpoint>(
        &self,
        collection: &str,
    ) -> anyhow::Result<Option<C>> {
        let key = self.key(collection);
        let Some(stored) = self.store.read_checkpoint(&key).await? else {
            return Ok(None);
        };

        let position = C::from_cli_string(&stored.position).with_context(|| {
            format!(
                "Stored {} checkpoint {key} is not decodable: '{}'",
                C::DATABASE_TYPE,
                stored.position
            )
        })?;
        Ok(Some(position))
    }

    /// Encode and store the checkpoint of a collection, overwriting any previous one.
    pub async fn emit_checkpoint<C: Checkpoint>(
        &self,
        collection: &str,
        checkpoint: &C,
    ) -> anyhow::Result<()> {
        let key = self.key(collection);
        let encoded = checkpoint.to_cli_string();
        self.store.store_checkpoint(&key, encoded.clone()).await?;
        tracing::debug!("Stored {} checkpoint {}: {}", C::DATABASE_TYPE, key, encoded);
        Ok(())
    }

    /// Read every checkpoint in this namespace and decode it.
    pub async fn list_checkpoints<C: Checkpoint>(&self) -> anyhow::Result<Vec<(String, C)>> {
        self.store
            .list_checkpoints(&self.namespace)
            .await?
            .into_iter()
            .map(|stored| {
                let position = C::from_cli_string(&stored.position).with_context(|| {
                    format!(
                        "Stored checkpoint for '{}' is not decodable: '{}'",
                        stored.collection, stored.position
                    )
                })?;
                Ok((stored.collection, position))
            })
            .collect()
    }
}
