//! MongoDB collection tailing for mongo-tail
//!
//! Turns append-only MongoDB collections into a resumable event stream:
//!
//! - [`discovery`] - picks the collections whose names match a pattern
//! - [`source`] - reads batches ordered by `_id` after a [`Cursor`]
//! - [`tail`] - the loop that transforms, emits and checkpoints documents
//!
//! Positions are stored through the `checkpoint` crate, one per collection,
//! so a restarted engine neither loses nor replays documents.

pub mod backoff;
pub mod config;
pub mod cursor;
pub mod discovery;
pub mod error;
pub mod provenance;
pub mod source;
pub mod tail;
pub mod testing;

pub use backoff::Backoff;
pub use config::{SourceOpts, TailConfig};
pub use cursor::{Cursor, UnpackedId};
pub use discovery::{list_matching, CollectionFilter};
pub use error::TailError;
pub use provenance::ProvenanceOpts;
pub use source::{DocumentSource, MongoSource};
pub use tail::{DiscoveryReport, PassOutcome, TailLoop, TailStats, WatchedCollection};
