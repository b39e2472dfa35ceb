//! Core types for the mongo-tail engine.
//!
//! This crate is independent of any database driver:
//!
//! - [`DocValue`] - Tagged tree every source document is converted into
//! - [`FlatEvent`] - Single-level record emitted downstream
//! - [`EventSink`] - Downstream emission trait (with [`ChannelSink`])
//! - [`transform`] - `flatten`, `dig` and `raw` document transforms
//!
//! # Architecture
//!
//! ```text
//! tail-core (this crate)
//!    │
//!    ├─── mongodb-types          (BSON → DocValue)
//!    └─── mongodb-tail-source    (discovery, cursor reader, tail loop)
//! ```
//!
//! # Example
//!
//! ```rust
//! use tail_core::{transform, DocValue, TransformOptions};
//!
//! let doc = DocValue::object([
//!     ("_id", DocValue::from("558de77ec5ed007567574a58")),
//!     ("info", DocValue::object([("status", DocValue::from("200"))])),
//! ]);
//!
//! let event = transform(&doc, &TransformOptions::default()).unwrap();
//! assert_eq!(event.get("info_status"), Some(&DocValue::Int(200)));
//! assert!(event.get("_id").is_none());
//! ```

pub mod event;
pub mod sink;
pub mod transform;
pub mod values;

// Re-exports for convenience
pub use event::FlatEvent;
pub use sink::{ChannelSink, EventSink};
pub use transform::{
    coerce_scalar, coerce_str, transform, TransformError, TransformMode, TransformOptions,
};
pub use values::DocValue;
