//! Error types for tidemark
//!
//! One error enum is shared by every crate in the workspace. Each variant
//! carries a stable numeric [`ErrorCode`] that command replies expose.

use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable numeric status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    /// Success
    Ok = 0,
    /// Malformed argument
    BadValue = 2,
    /// Required field or record missing
    NoSuchKey = 4,
    /// Validation failed before anything was applied
    UnknownError = 8,
    /// Payload could not be parsed
    FailedToParse = 9,
    /// Operation not allowed in the current state
    IllegalOperation = 20,
    /// Namespace or collection id did not resolve
    NamespaceNotFound = 26,
    /// Namespace already taken
    NamespaceExists = 48,
    /// Unsupported option
    InvalidOptions = 72,
    /// Two writers touched the same document
    WriteConflict = 112,
    /// Requested snapshot is older than retained history
    SnapshotTooOld = 239,
    /// Write requires a primary
    NotWritablePrimary = 10107,
    /// Unique key already present
    DuplicateKey = 11000,
    /// Update target missing and upsert not requested
    UpdateOperationFailed = 11001,
}

impl ErrorCode {
    /// Numeric value
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Code for a numeric value; unknown values map to `UnknownError`
    pub fn from_i32(code: i32) -> ErrorCode {
        match code {
            0 => ErrorCode::Ok,
            2 => ErrorCode::BadValue,
            4 => ErrorCode::NoSuchKey,
            9 => ErrorCode::FailedToParse,
            20 => ErrorCode::IllegalOperation,
            26 => ErrorCode::NamespaceNotFound,
            48 => ErrorCode::NamespaceExists,
            72 => ErrorCode::InvalidOptions,
            112 => ErrorCode::WriteConflict,
            239 => ErrorCode::SnapshotTooOld,
            10107 => ErrorCode::NotWritablePrimary,
            11000 => ErrorCode::DuplicateKey,
            11001 => ErrorCode::UpdateOperationFailed,
            _ => ErrorCode::UnknownError,
        }
    }

    /// Symbolic name, as reported in `codeName`
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Ok => "OK",
            ErrorCode::BadValue => "BadValue",
            ErrorCode::NoSuchKey => "NoSuchKey",
            ErrorCode::UnknownError => "UnknownError",
            ErrorCode::FailedToParse => "FailedToParse",
            ErrorCode::IllegalOperation => "IllegalOperation",
            ErrorCode::NamespaceNotFound => "NamespaceNotFound",
            ErrorCode::NamespaceExists => "NamespaceExists",
            ErrorCode::InvalidOptions => "InvalidOptions",
            ErrorCode::WriteConflict => "WriteConflict",
            ErrorCode::SnapshotTooOld => "SnapshotTooOld",
            ErrorCode::NotWritablePrimary => "NotWritablePrimary",
            ErrorCode::DuplicateKey => "DuplicateKey",
            ErrorCode::UpdateOperationFailed => "UpdateOperationFailed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// All tidemark errors
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed argument
    #[error("bad value: {0}")]
    BadValue(String),

    /// Required field or record missing
    #[error("no such key: {0}")]
    NoSuchKey(String),

    /// Pre-execution validation failure; nothing was applied
    #[error("{message}")]
    UnknownError {
        /// Human-readable message
        message: String,
        /// Underlying failure
        #[source]
        cause: Option<Box<Error>>,
    },

    /// Payload could not be parsed
    #[error("failed to parse: {0}")]
    FailedToParse(String),

    /// Operation not allowed in the current state
    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    /// Namespace or collection id did not resolve
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    /// Namespace already taken
    #[error("namespace exists: {0}")]
    NamespaceExists(String),

    /// Unsupported option
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Two writers touched the same document
    #[error("write conflict: {0}")]
    WriteConflict(String),

    /// Requested snapshot is older than retained history
    #[error("snapshot too old: requested {requested}, oldest retained {oldest}")]
    SnapshotTooOld {
        /// Requested read timestamp
        requested: Timestamp,
        /// Oldest timestamp still retained
        oldest: Timestamp,
    },

    /// Write requires a primary
    #[error("not primary: {0}")]
    NotWritablePrimary(String),

    /// Unique key already present
    #[error("duplicate key in {namespace}: {key}")]
    DuplicateKey {
        /// Collection the insert targeted
        namespace: String,
        /// Canonical key that collided
        key: String,
    },

    /// Update target missing and upsert not requested
    #[error("update failed: {0}")]
    UpdateOperationFailed(String),

    /// Error reported by a remote reply, preserved by code
    #[error("{code}: {message}")]
    Reported {
        /// Reported code
        code: ErrorCode,
        /// Reported message
        message: String,
    },
}

/// Result type for tidemark operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a validation failure so the caller knows nothing was applied
    pub fn unknown(message: impl Into<String>, cause: Error) -> Self {
        Error::UnknownError {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Rebuild an error from a reported code and message
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::BadValue => Error::BadValue(message),
            ErrorCode::NoSuchKey => Error::NoSuchKey(message),
            ErrorCode::FailedToParse => Error::FailedToParse(message),
            ErrorCode::IllegalOperation => Error::IllegalOperation(message),
            ErrorCode::NamespaceNotFound => Error::NamespaceNotFound(message),
            ErrorCode::NamespaceExists => Error::NamespaceExists(message),
            ErrorCode::InvalidOptions => Error::InvalidOptions(message),
            ErrorCode::WriteConflict => Error::WriteConflict(message),
            ErrorCode::NotWritablePrimary => Error::NotWritablePrimary(message),
            ErrorCode::UpdateOperationFailed => Error::UpdateOperationFailed(message),
            code => Error::Reported { code, message },
        }
    }

    /// Stable code of this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::BadValue(_) => ErrorCode::BadValue,
            Error::NoSuchKey(_) => ErrorCode::NoSuchKey,
            Error::UnknownError { .. } => ErrorCode::UnknownError,
            Error::FailedToParse(_) => ErrorCode::FailedToParse,
            Error::IllegalOperation(_) => ErrorCode::IllegalOperation,
            Error::NamespaceNotFound(_) => ErrorCode::NamespaceNotFound,
            Error::NamespaceExists(_) => ErrorCode::NamespaceExists,
            Error::InvalidOptions(_) => ErrorCode::InvalidOptions,
            Error::WriteConflict(_) => ErrorCode::WriteConflict,
            Error::SnapshotTooOld { .. } => ErrorCode::SnapshotTooOld,
            Error::NotWritablePrimary(_) => ErrorCode::NotWritablePrimary,
            Error::DuplicateKey { .. } => ErrorCode::DuplicateKey,
            Error::UpdateOperationFailed(_) => ErrorCode::UpdateOperationFailed,
            Error::Reported { code, .. } => *code,
        }
    }

    /// Code of the innermost cause
    ///
    /// For a wrapped validation failure this is the code of the failure
    /// that triggered it, e.g. `NamespaceNotFound` under `UnknownError`.
    pub fn root_code(&self) -> ErrorCode {
        match self {
            Error::UnknownError {
                cause: Some(cause), ..
            } => cause.root_code(),
            other => other.code(),
        }
    }

    /// Check if this is a write conflict
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, Error::WriteConflict(_))
    }

    /// Check if this error is retryable.
    ///
    /// Write conflicts may succeed when the work is redone.
    pub fn is_retryable(&self) -> bool {
        self.is_write_conflict()
    }

    /// Check if this is a resolution failure
    pub fn is_namespace_not_found(&self) -> bool {
        self.root_code() == ErrorCode::NamespaceNotFound
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::FailedToParse(e.to_string())
    }
}
