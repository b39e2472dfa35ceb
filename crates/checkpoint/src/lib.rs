//! Checkpoint management for mongo-tail
//!
//! Provides durable, per-collection resume positions.
//!
//! # Architecture
//!
//! This crate provides a generic checkpoint system that:
//! - Defines the `Checkpoint` trait for database-specific position types
//! - Stores encoded positions keyed by `(namespace, collection)` via the
//!   `CheckpointStore` trait
//! - Offers typed get/put through `CheckpointManager`
//!
//! ## Storage Backends
//!
//! - `SqliteStore` - Stores checkpoints in a single embedded SQLite file
//! - `MemoryStore` - Keeps checkpoints in process memory (tests)
//!
//! A missing checkpoint is reported as `None`, never as a zero position.

mod config;
mod manager;
mod memory;
mod sqlite;
pub mod store;


// Re-export config types
pub use config::{CheckpointConfig, DEFAULT_DIR, DEFAULT_FILE_NAME, DEFAULT_NAMESPACE};

// Re-export manager types
pub use manager::CheckpointManager;

// Re-export store trait and types
pub use store::{CheckpointKey, CheckpointStore, StoredCheckpoint};

// Re-export storage implementations
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Trait that database-specific positions must implement.
///
/// A position is stored as a string, so the encoding must be stable across
/// releases and `from_cli_string(to_cli_string(x)) == x`.
///
/// # Example
///
/// ```rust
/// use checkpoint::Checkpoint;
///
/// #[derive(Debug, Clone, PartialEq)]
/// pub struct SequenceCheckpoint {
///     pub sequence_id: i64,
/// }
///
/// impl Checkpoint for SequenceCheckpoint {
///     const DATABASE_TYPE: &'static str = "sequence";
///
///     fn to_cli_string(&self) -> String {
///         self.sequence_id.to_string()
///     }
///
///     fn from_cli_string(s: &str) -> anyhow::Result<Self> {
///         Ok(Self {
///             sequence_id: s.parse()?,
///         })
///     }
/// }
///
/// let cp = SequenceCheckpoint { sequence_id: 42 };
/// assert_eq!(SequenceCheckpoint::from_cli_string(&cp.to_cli_string()).unwrap(), cp);
/// ```
pub trait Checkpoint: Clone {
    /// Database type identifier (e.g., "mongodb").
    ///
    /// Used in logging and in decode error messages.
    const DATABASE_TYPE: &'static str;

    /// Convert to the stored/CLI string format.
    ///
    /// The returned string should be parseable by `from_cli_string()`.
    fn to_cli_string(&self) -> String;

    /// Parse from the stored/CLI string format.
    fn from_cli_string(s: &str) -> anyhow::Result<Self>
    where
        Self: Sized;
}
