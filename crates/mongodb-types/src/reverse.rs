//! Reverse conversion: BSON value → DocValue.
//!
//! Types without a JSON equivalent are rendered as text:
//!
//! | BSON                     | DocValue                            |
//! |--------------------------|-------------------------------------|
//! | ObjectId                 | 24-char hex string                  |
//! | DateTime                 | RFC 3339 string (millisecond, `Z`)  |
//! | Timestamp                | integer `(time << 32) \| increment` |
//! | Decimal128               | decimal string                      |
//! | Binary (UUID subtype)    | hyphenated UUID string              |
//! | Binary (other)           | base64 string                       |
//! | Regex                    | `/pattern/options` string           |
//! | JavaScript code / Symbol | string                              |
//! | Undefined, MinKey, MaxKey| null                                |
//!
//! DbPointer is deprecated and rejected.

use base64::Engine;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document};
use chrono::SecondsFormat;
use tail_core::{DocValue, TransformError};

/// Convert a whole document.
///
/// # Errors
///
/// Returns [`TransformError::Unsupported`] naming the dotted path of the
/// first value that cannot be represented.
pub fn document_to_doc_value(doc: &Document) -> Result<DocValue, TransformError> {
    convert_document(doc, "")
}

/// Convert a single BSON value.
pub fn bson_to_doc_value(value: &Bson) -> Result<DocValue, TransformError> {
    convert(value, "")
}

fn convert_document(doc: &Document, path: &str) -> Result<DocValue, TransformError> {
    let mut entries = Vec::with_capacity(doc.len());
    for (key, value) in doc {
        let child_path = join_path(path, key);
        entries.push((key.clone(), convert(value, &child_path)?));
    }
    Ok(DocValue::Object(entries))
}

fn convert(value: &Bson, path: &str) -> Result<DocValue, TransformError> {
    let converted = match value {
        Bson::Null | Bson::Undefined | Bson::MinKey | Bson::MaxKey => DocValue::Null,
        Bson::Boolean(b) => DocValue::Bool(*b),
        Bson::Int32(i) => DocValue::Int(i64::from(*i)),
        Bson::Int64(i) => DocValue::Int(*i),
        Bson::Double(f) => DocValue::Float(*f),
        Bson::String(s) => DocValue::String(s.clone()),
        Bson::Document(doc) => convert_document(doc, path)?,
        Bson::Array(items) => {
            let mut elements = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                elements.push(convert(item, &join_path(path, &index.to_string()))?);
            }
            DocValue::Array(elements)
        }
        Bson::ObjectId(oid) => DocValue::String(oid.to_hex()),
        Bson::DateTime(dt) => {
            DocValue::String(dt.to_chrono().to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        Bson::Timestamp(ts) => DocValue::Int((i64::from(ts.time) << 32) | i64::from(ts.increment)),
        Bson::Decimal128(d) => DocValue::String(d.to_string()),
        Bson::Binary(bin) => DocValue::String(binary_to_string(bin)),
        Bson::RegularExpression(regex) => {
            DocValue::String(format!("/{}/{}", regex.pattern, regex.options))
        }
        Bson::JavaScriptCode(code) => DocValue::String(code.clone()),
        Bson::JavaScriptCodeWithScope(code_scope) => DocValue::String(code_scope.code.clone()),
        Bson::Symbol(s) => DocValue::String(s.clone()),
        Bson::DbPointer(_) => {
            return Err(TransformError::Unsupported {
                path: path.to_string(),
                reason: "DBPointer values are not supported".to_string(),
            })
        }
    };
    Ok(converted)
}

fn binary_to_string(bin: &Binary) -> String {
    if matches!(bin.subtype, BinarySubtype::Uuid | BinarySubtype::UuidOld) {
        if let Ok(uuid) = uuid::Uuid::from_slice(&bin.bytes) {
            return uuid.to_string();
        }
    }
    base64::engine::general_purpose::STANDARD.encode(&bin.bytes)
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}
