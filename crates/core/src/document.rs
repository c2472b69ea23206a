//! Document representation
//!
//! Documents are ordered JSON objects. Field order is preserved so that
//! replacement and `$rename` produce the same layout replicas see.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A stored document
pub type Document = Map<String, Value>;

/// Primary-key field every stored document carries
pub const ID_FIELD: &str = "_id";

/// Canonical form of a document's `_id`, used as the record key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocKey(String);

impl DocKey {
    /// Key for an `_id` value
    ///
    /// Numbers compare by value, so `1` and `1.0` name the same document.
    pub fn from_id(id: &Value) -> Self {
        DocKey(canonical(id).to_string())
    }

    /// Key of a document, which must carry `_id`
    pub fn of(doc: &Document) -> Result<Self> {
        doc.get(ID_FIELD)
            .map(DocKey::from_id)
            .ok_or_else(|| Error::BadValue(format!("document has no {} field", ID_FIELD)))
    }

    /// Canonical string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Integral floats become integers, recursively
fn canonical(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::from(f as i64),
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonical(v)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build a document from a JSON value, which must be an object
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tidemark_core::document::doc;
///
/// let d = doc(json!({"_id": 1, "x": 2})).unwrap();
/// assert_eq!(d.len(), 2);
/// assert!(doc(json!([1, 2])).is_err());
/// ```
pub fn doc(value: Value) -> Result<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::BadValue(format!("expected a document, got {}", other))),
    }
}
