//! Document → event transforms.
//!
//! Three modes are supported:
//!
//! - [`TransformMode::Flatten`]: recursive flatten, nested keys joined with `_`
//! - [`TransformMode::Dig`]: two-level flatten restricted to configured field names
//! - [`TransformMode::Raw`]: top-level fields copied with minimal coercion
//!
//! The identifier field (`_id` for MongoDB) is never part of the output;
//! callers surface it separately as a provenance field.
//!
//! When two source paths produce the same flattened key (`{"a_b": 1}` and
//! `{"a": {"b": 2}}`), the one visited last wins.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::event::FlatEvent;
use crate::values::DocValue;

/// Token coerced to `f64::NAN`.
pub const NAN_TOKEN: &str = "NaN";

static INTEGER_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A[-+]?\d+\z").expect("valid integer literal regex"));

static DECIMAL_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A[-+]?\d+\.\d+\z").expect("valid decimal literal regex"));

/// How a source document is turned into a [`FlatEvent`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformMode {
    #[default]
    Flatten,
    Dig,
    Raw,
}

impl TransformMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformMode::Flatten => "flatten",
            TransformMode::Dig => "dig",
            TransformMode::Raw => "raw",
        }
    }
}

impl std::fmt::Display for TransformMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformMode {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flatten" => Ok(TransformMode::Flatten),
            "dig" => Ok(TransformMode::Dig),
            "raw" | "simple" => Ok(TransformMode::Raw),
            other => Err(TransformError::UnknownMode(other.to_string())),
        }
    }
}

/// Errors raised while transforming a single document.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("expected a document at the top level, found {found}")]
    NotADocument { found: &'static str },

    #[error("unsupported value at '{path}': {reason}")]
    Unsupported { path: String, reason: String },

    #[error("unknown transform mode '{0}' (expected flatten, dig or raw)")]
    UnknownMode(String),
}

/// Options shared by all transform modes.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOptions {
    pub mode: TransformMode,
    /// Top-level key excluded from the output
    pub id_field: String,
    /// First-level fields expanded in dig mode
    pub dig_fields: Vec<String>,
    /// Second-level fields expanded in dig mode
    pub dig_dig_fields: Vec<String>,
    /// Fields copied verbatim in flatten mode (no coercion, no recursion)
    pub pass_through_fields: Vec<String>,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            mode: TransformMode::Flatten,
            id_field: "_id".to_string(),
            dig_fields: Vec::new(),
            dig_dig_fields: Vec::new(),
            pass_through_fields: vec!["tags".to_string()],
        }
    }
}

impl TransformOptions {
    pub fn with_mode(mode: TransformMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

/// Transform one document according to `opts.mode`.
pub fn transform(doc: &DocValue, opts: &TransformOptions) -> Result<FlatEvent, TransformError> {
    match opts.mode {
        TransformMode::Flatten => flatten(doc, opts),
        TransformMode::Dig => dig(doc, opts),
        TransformMode::Raw => raw(doc, opts),
    }
}

/// Recursively flatten a document into `parent_child` keys.
///
/// Scalars go through [`coerce_scalar`]; arrays are copied whole.
pub fn flatten(doc: &DocValue, opts: &TransformOptions) -> Result<FlatEvent, TransformError> {
    let entries = top_level_entries(doc)?;
    let mut event = FlatEvent::new();
    flatten_into(None, entries, opts, &mut event);
    Ok(event)
}

fn flatten_into(
    prefix: Option<&str>,
    entries: &[(String, DocValue)],
    opts: &TransformOptions,
    event: &mut FlatEvent,
) {
    for (key, value) in entries {
        if prefix.is_none() && *key == opts.id_field {
            continue;
        }

        let path = match prefix {
            Some(p) => format!("{p}_{key}"),
            None => key.clone(),
        };

        if opts.pass_through_fields.iter().any(|f| f == key) {
            event.insert(path, value.clone());
            continue;
        }

        match value {
            DocValue::Object(children) => flatten_into(Some(&path), children, opts, event),
            DocValue::Array(_) => {
                event.insert(path, value.clone());
            }
            scalar => {
                event.insert(path, coerce_scalar(scalar));
            }
        }
    }
}

/// Shallow flatten of the configured `dig_fields` / `dig_dig_fields`.
///
/// Values that are not expanded keep a single field; nested objects among
/// them are rendered as JSON text.
pub fn dig(doc: &DocValue, opts: &TransformOptions) -> Result<FlatEvent, TransformError> {
    let entries = top_level_entries(doc)?;
    let mut event = FlatEvent::new();

    for (key, value) in entries {
        if *key == opts.id_field {
            continue;
        }

        match value {
            DocValue::Object(children) if opts.dig_fields.contains(key) => {
                for (child_key, child) in children {
                    match child {
                        DocValue::Object(grandchildren) if opts.dig_dig_fields.contains(child_key) => {
                            for (gc_key, gc) in grandchildren {
                                event.insert(format!("{key}_{child_key}_{gc_key}"), dig_leaf(gc));
                            }
                        }
                        _ => {
                            event.insert(format!("{key}_{child_key}"), dig_leaf(child));
                        }
                    }
                }
            }
            _ => {
                event.insert(key.clone(), dig_leaf(value));
            }
        }
    }

    Ok(event)
}

fn dig_leaf(value: &DocValue) -> DocValue {
    match value {
        DocValue::Object(_) => DocValue::String(value.to_json_string()),
        DocValue::Array(_) => value.clone(),
        scalar => coerce_scalar(scalar),
    }
}

/// Copy top-level fields, coercing only the NaN token.
pub fn raw(doc: &DocValue, opts: &TransformOptions) -> Result<FlatEvent, TransformError> {
    let entries = top_level_entries(doc)?;
    let mut event = FlatEvent::new();

    for (key, value) in entries {
        if *key == opts.id_field {
            continue;
        }
        let value = match value {
            DocValue::String(s) if s == NAN_TOKEN => DocValue::Float(f64::NAN),
            other => other.clone(),
        };
        event.insert(key.clone(), value);
    }

    Ok(event)
}

fn top_level_entries(doc: &DocValue) -> Result<&[(String, DocValue)], TransformError> {
    doc.as_object()
        .ok_or(TransformError::NotADocument { found: doc.kind() })
}

/// Apply the numeric-string coercion policy to a scalar.
///
/// Non-string values are returned unchanged.
pub fn coerce_scalar(value: &DocValue) -> DocValue {
    match value {
        DocValue::String(s) => coerce_str(s),
        other => other.clone(),
    }
}

/// Coerce a string to int, float or NaN when it is a numeric literal.
///
/// - `"42"`, `"-7"`, `"+3"` → integer (an out-of-range integer falls back to float)
/// - `"3.14"` → float
/// - `"NaN"` → `f64::NAN`
/// - anything else → the string unchanged
pub fn coerce_str(s: &str) -> DocValue {
    if s == NAN_TOKEN {
        return DocValue::Float(f64::NAN);
    }

    if INTEGER_LITERAL.is_match(s) {
        if let Ok(i) = s.parse::<i64>() {
            return DocValue::Int(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return DocValue::Float(f);
        }
    } else if DECIMAL_LITERAL.is_match(s) {
        if let Ok(f) = s.parse::<f64>() {
            return DocValue::Float(f);
        }
    }

    DocValue::String(s.to_string())
}
