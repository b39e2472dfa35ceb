//! Library-level options (no clap).

use std::time::Duration;

use tail_core::TransformOptions;

use crate::error::TailError;

pub const DEFAULT_BATCH_SIZE: usize = 30;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_POLL_FLOOR: Duration = Duration::from_millis(10);
pub const DEFAULT_POLL_CEILING: Duration = Duration::from_secs(5);

/// Source database connection options (MongoDB-specific, library type without clap)
#[derive(Clone, Debug)]
pub struct SourceOpts {
    pub source_uri: String,
    /// Overrides the default database named in the URI
    pub source_database: Option<String>,
}

/// Behaviour of the tail loop.
#[derive(Clone, Debug)]
pub struct TailConfig {
    /// Regex matched against collection names
    pub collection_pattern: String,
    /// Exact names never watched, even when they match
    pub exclude_collections: Vec<String>,
    pub batch_size: usize,
    /// Wait after a failed fetch before the next pass
    pub retry_delay: Duration,
    pub poll_floor: Duration,
    pub poll_ceiling: Duration,
    pub transform: TransformOptions,
    /// Add `mongo_timestamp`, `mongo_machine_id`, `mongo_process_id`, `mongo_counter`
    pub unpack_mongo_id: bool,
    /// Add `log_entry` with the source document as extended JSON
    pub add_log_entry: bool,
    /// Drop back to the floor after a pass that emitted something
    pub reset_backoff_on_data: bool,
    /// Also checkpoint every K documents within a batch
    pub checkpoint_every: Option<usize>,
}

impl TailConfig {
    pub fn new(collection_pattern: impl Into<String>) -> Self {
        Self {
            collection_pattern: collection_pattern.into(),
            exclude_collections: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            retry_delay: DEFAULT_RETRY_DELAY,
            poll_floor: DEFAULT_POLL_FLOOR,
            poll_ceiling: DEFAULT_POLL_CEILING,
            transform: TransformOptions::default(),
            unpack_mongo_id: false,
            add_log_entry: false,
            reset_backoff_on_data: false,
            checkpoint_every: None,
        }
    }

    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> Result<(), TailError> {
        if self.collection_pattern.is_empty() {
            return Err(TailError::config("collection pattern must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(TailError::config("batch_size must be at least 1"));
        }
        if self.poll_floor.is_zero() {
            return Err(TailError::config("poll_floor must be greater than zero"));
        }
        if self.poll_ceiling < self.poll_floor {
            return Err(TailError::config(format!(
                "poll_ceiling ({:?}) must not be below poll_floor ({:?})",
                self.poll_ceiling, self.poll_floor
            )));
        }
        if self.checkpoint_every == Some(0) {
            return Err(TailError::config("checkpoint_every must be at least 1"));
        }
        Ok(())
    }
}
