//! MongoDB/BSON type conversions for tail-core values.
//!
//! Every document read from a collection is converted into a
//! [`tail_core::DocValue`] tree before it is transformed, so the transform
//! code never sees driver types.
//!
//! # Modules
//!
//! - [`reverse`] - BSON value → DocValue conversion
//!
//! # Example
//!
//! ```rust
//! use bson::doc;
//! use mongodb_types::document_to_doc_value;
//! use tail_core::DocValue;
//!
//! let value = document_to_doc_value(&doc! { "status": 200, "ok": true }).unwrap();
//! assert_eq!(value.get("status"), Some(&DocValue::Int(200)));
//! ```

pub mod reverse;

pub use reverse::{bson_to_doc_value, document_to_doc_value};
