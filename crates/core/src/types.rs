//! Core identifiers
//!
//! This module defines the names things are addressed by:
//! - [`Namespace`]: logical `db.collection` name, unstable across drops
//! - [`CollectionId`]: stable collection id that survives renames
//! - [`Ident`]: one physical incarnation of a collection or index

use crate::error::{Error, Result};
use crate::timestamp::{OpTime, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const COMMAND_COLLECTION: &str = "$cmd";
const DROP_PENDING_PREFIX: &str = "system.drop.";
const PROFILE_COLLECTION: &str = "system.profile";
const LOCAL_DB: &str = "local";

/// Logical collection name, `db.collection`
///
/// Namespaces order lexicographically by database, then collection.
///
/// # Examples
///
/// ```
/// use tidemark_core::Namespace;
///
/// let ns = Namespace::parse("test.orders").unwrap();
/// assert_eq!(ns.db(), "test");
/// assert_eq!(ns.coll(), "orders");
/// assert_eq!(ns.command_ns().to_string(), "test.$cmd");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace {
    db: String,
    coll: String,
}

impl Namespace {
    /// Create a namespace from its parts
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Namespace {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// Parse `db.collection`
    ///
    /// The collection part may itself contain dots.
    pub fn parse(full: &str) -> Result<Self> {
        match full.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Namespace::new(db, coll)),
            _ => Err(Error::BadValue(format!("invalid namespace: {:?}", full))),
        }
    }

    /// Database name
    pub fn db(&self) -> &str {
        &self.db
    }

    /// Collection name
    pub fn coll(&self) -> &str {
        &self.coll
    }

    /// The command namespace of this namespace's database
    pub fn command_ns(&self) -> Namespace {
        Namespace::new(self.db.clone(), COMMAND_COLLECTION)
    }

    /// Command namespace for `db`
    pub fn command_ns_for(db: &str) -> Namespace {
        Namespace::new(db, COMMAND_COLLECTION)
    }

    /// True for `db.$cmd`
    pub fn is_command(&self) -> bool {
        self.coll == COMMAND_COLLECTION
    }

    /// True for `system.*` collections
    pub fn is_system(&self) -> bool {
        self.coll.starts_with("system.")
    }

    /// Whether writes to this namespace are replicated
    ///
    /// Everything in the `local` database and every `system.profile`
    /// collection is node-local.
    pub fn is_replicated(&self) -> bool {
        self.db != LOCAL_DB && self.coll != PROFILE_COLLECTION
    }

    /// True for `system.profile`
    pub fn is_profile(&self) -> bool {
        self.coll == PROFILE_COLLECTION
    }

    /// Name a collection is parked under while its drop is pending
    ///
    /// Format: `db.system.drop.<ts>t<term>.<coll>`.
    pub fn drop_pending(&self, optime: OpTime) -> Namespace {
        Namespace::new(
            self.db.clone(),
            format!(
                "{}{}t{}.{}",
                DROP_PENDING_PREFIX, optime.timestamp, optime.term, self.coll
            ),
        )
    }

    /// True if this is a drop-pending name
    pub fn is_drop_pending(&self) -> bool {
        self.coll.starts_with(DROP_PENDING_PREFIX)
    }

    /// The drop optime encoded in a drop-pending name
    pub fn drop_pending_optime(&self) -> Option<OpTime> {
        let rest = self.coll.strip_prefix(DROP_PENDING_PREFIX)?;
        let (encoded, _) = rest.split_once('.')?;
        let (ts, term) = encoded.split_once('t')?;
        Some(OpTime::new(
            Timestamp::new(ts.parse().ok()?),
            term.parse().ok()?,
        ))
    }

    /// The name a drop-pending namespace had before it was dropped
    pub fn original_from_drop_pending(&self) -> Option<Namespace> {
        let rest = self.coll.strip_prefix(DROP_PENDING_PREFIX)?;
        let (_, coll) = rest.split_once('.')?;
        if coll.is_empty() {
            return None;
        }
        Some(Namespace::new(self.db.clone(), coll))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

impl TryFrom<String> for Namespace {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Namespace::parse(&value)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.to_string()
    }
}

impl std::str::FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Namespace::parse(s)
    }
}

/// Stable collection identifier
///
/// Survives renames. Collections created without one (legacy path) have
/// none, and operations naming an id never resolve to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(Uuid);

impl CollectionId {
    /// Create a new random id using UUID v4
    pub fn new() -> Self {
        CollectionId(Uuid::new_v4())
    }

    /// Wrap an existing uuid
    pub fn from_uuid(uuid: Uuid) -> Self {
        CollectionId(uuid)
    }

    /// Underlying uuid
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CollectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque name of one physical table
///
/// A collection keeps its ident across renames and gets a new one when
/// dropped and recreated. Idents sort so that `collection-*` precedes
/// `index-*`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ident(String);

impl Ident {
    /// Wrap a raw ident string
    pub fn new(value: impl Into<String>) -> Self {
        Ident(value.into())
    }

    /// Raw ident string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for collection idents
    pub fn is_collection(&self) -> bool {
        self.0.starts_with("collection-")
    }

    /// True for index idents
    pub fn is_index(&self) -> bool {
        self.0.starts_with("index-")
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
