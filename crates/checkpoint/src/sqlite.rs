//! SQLite checkpoint storage implementation.
//!
//! One small file holds a single table keyed by `(namespace, collection)`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::store::{CheckpointKey, CheckpointStore, StoredCheckpoint};

/// Table holding one row per watched collection.
///
/// `position` is the encoded cursor, `updated_at` an RFC 3339 timestamp.
const CREATE_CHECKPOINTS: &str = r#"
CREATE TABLE IF NOT EXISTS tail_checkpoints (
    namespace   TEXT NOT NULL,
    collection  TEXT NOT NULL,
    position    TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (namespace, collection)
)
"#;

const UPSERT_CHECKPOINT: &str = r#"
INSERT INTO tail_checkpoints (namespace, collection, position, updated_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT (namespace, collection)
DO UPDATE SET position = excluded.position, updated_at = excluded.updated_at
"#;

const SELECT_CHECKPOINT: &str = r#"
SELECT position, updated_at FROM tail_checkpoints
WHERE namespace = ?1 AND collection = ?2
"#;

const SELECT_NAMESPACE: &str = r#"
SELECT collection, position, updated_at FROM tail_checkpoints
WHERE namespace = ?1
ORDER BY collection
"#;

/// SQLite implementation of CheckpointStore trait.
///
/// The connection is opened once and serialised behind a mutex; the engine
/// has a single writer so the lock is never contended.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the checkpoint file at `path`.
    ///
    /// Missing parent directories are created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create checkpoint directory {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open checkpoint store {}", path.display()))?;

        tracing::debug!("Opened checkpoint store {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        })
    }

    /// Location of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("checkpoint store connection lock poisoned"))?;
        Ok(f(&conn)?)
    }
}

fn parse_updated_at(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid updated_at timestamp in checkpoint store: {raw}"))?
        .with_timezone(&Utc))
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn ensure_schema(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch(CREATE_CHECKPOINTS))
            .context("Failed to create checkpoint table")
    }

    async fn store_checkpoint(&self, key: &CheckpointKey, position: String) -> Result<()> {
        let updated_at = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                UPSERT_CHECKPOINT,
                params![key.namespace, key.collection, position, updated_at],
            )
        })
        .with_context(|| format!("Failed to store checkpoint {key}"))?;
        Ok(())
    }

    async fn read_checkpoint(&self, key: &CheckpointKey) -> Result<Option<StoredCheckpoint>> {
        let row = self
            .with_conn(|conn| {
                conn.query_row(SELECT_CHECKPOINT, params![key.namespace, key.collection], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .optional()
            })
            .with_context(|| format!("Failed to read checkpoint {key}"))?;

        match row {
            Some((position, updated_at)) => Ok(Some(StoredCheckpoint {
                namespace: key.namespace.clone(),
                collection: key.collection.clone(),
                position,
                updated_at: parse_updated_at(&updated_at)?,
            })),
            None => Ok(None),
        }
    }

    async fn list_checkpoints(&self, namespace: &str) -> Result<Vec<StoredCheckpoint>> {
        let rows = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare(SELECT_NAMESPACE)?;
                let rows = stmt.query_map(params![namespace], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .with_context(|| format!("Failed to list checkpoints for namespace {namespace}"))?;

        rows.into_iter()
            .map(|(collection, position, updated_at)| {
                Ok(StoredCheckpoint {
                    namespace: namespace.to_string(),
                    collection,
                    position,
                    updated_at: parse_updated_at(&updated_at)?,
                })
            })
            .collect()
    }
}
