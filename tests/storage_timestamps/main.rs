//! Storage Timestamp Integration Tests
//!
//! End-to-end checks that applied operations, catalog changes and
//! consistency-marker writes become visible at exactly the timestamps
//! they were applied at.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test storage_timestamps
//!
//! # Catalog visibility only
//! cargo test --test storage_timestamps catalog_visibility::
//! ```

#[path = "../common/mod.rs"]
mod common;

mod catalog_visibility;
mod drops;
mod min_valid;

use serde_json::Value;
use tidemark::core::Document;

/// Document as a JSON value, for comparisons against `json!` literals
pub fn as_value(document: Option<Document>) -> Value {
    document.map(Value::Object).unwrap_or(Value::Null)
}
