//! Batch replies
//!
//! [`ApplyOpsReply`] is the structured result of an applyOps or doTxn batch.
//! [`status_from_reply`] turns a reply document back into a status, also
//! accepting documents that carry a `code` but no `ok` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidemark_core::{Error, ErrorCode, Result};

/// Outcome of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyOpsReply {
    /// True if every operation succeeded
    pub ok: bool,
    /// Error code on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// Error code name on failure
    #[serde(rename = "codeName", default, skip_serializing_if = "Option::is_none")]
    pub code_name: Option<String>,
    /// Error message on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errmsg: Option<String>,
    /// Number of operations attempted, the failing one included
    pub applied: usize,
    /// Per-operation outcome in batch order
    pub results: Vec<bool>,
}

/// Reply of a doTxn batch
pub type DoTxnReply = ApplyOpsReply;

impl ApplyOpsReply {
    /// Reply for a batch where every operation succeeded
    pub fn success(results: Vec<bool>) -> Self {
        Self {
            ok: true,
            code: None,
            code_name: None,
            errmsg: None,
            applied: results.len(),
            results,
        }
    }

    /// Reply for a batch that stopped at `err`
    pub fn failure(err: &Error, results: Vec<bool>) -> Self {
        let code = err.code();
        Self {
            ok: false,
            code: Some(code.as_i32()),
            code_name: Some(code.name().to_string()),
            errmsg: Some(err.to_string()),
            applied: results.len(),
            results,
        }
    }

    /// Reply for a batch rejected before any operation ran
    ///
    /// Reports the root cause code, so a wrapped resolution failure shows
    /// as `NamespaceNotFound`.
    pub fn from_error(err: &Error) -> Self {
        let code = err.root_code();
        Self {
            ok: false,
            code: Some(code.as_i32()),
            code_name: Some(code.name().to_string()),
            errmsg: Some(err.to_string()),
            applied: 0,
            results: Vec::new(),
        }
    }

    /// Status carried by this reply
    pub fn status(&self) -> Result<()> {
        if self.ok {
            return Ok(());
        }
        let code = self
            .code
            .map(ErrorCode::from_i32)
            .unwrap_or(ErrorCode::UnknownError);
        Err(Error::from_code(code, self.errmsg.clone().unwrap_or_default()))
    }

    /// Number of successful operations
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| **r).count()
    }

    /// Reply as a JSON document
    pub fn to_document(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Status of a reply document
///
/// A document without `ok` is treated as successful exactly when its
/// `code` is absent or zero.
pub fn status_from_reply(reply: &Value) -> Result<()> {
    let code = reply
        .get("code")
        .and_then(Value::as_i64)
        .map(|c| c as i32)
        .unwrap_or(0);
    let ok = match reply.get("ok") {
        Some(Value::Bool(ok)) => *ok,
        Some(Value::Number(n)) => n.as_f64().map_or(false, |v| v != 0.0),
        Some(_) => false,
        None => code == 0,
    };
    if ok {
        return Ok(());
    }
    let message = reply
        .get("errmsg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let code = if code == 0 {
        ErrorCode::UnknownError
    } else {
        ErrorCode::from_i32(code)
    };
    Err(Error::from_code(code, message))
}
