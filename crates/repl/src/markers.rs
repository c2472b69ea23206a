//! Replication consistency markers
//!
//! A singleton document in `local.replset.minvalid` recording how far this
//! node must apply before its data is consistent (`minValid`), the last
//! batch boundary it applied through, and whether an initial sync is in
//! progress.
//!
//! Every mutation is a read-modify-write of the whole document, serialized
//! by a mutex. Mutations carrying an optime are written at its timestamp,
//! so reading the document at an earlier timestamp shows the state before
//! them. A mutation older than versions already written is carried into
//! those versions for every field no later write has changed itself.
//! Initialization and the initial-sync flag are written untimestamped and
//! are visible at every timestamp.

use crate::storage_interface::StorageInterface;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tidemark_catalog::CollectionOptions;
use tidemark_core::document::doc;
use tidemark_core::{
    Document, Error, Namespace, OpTime, ReadContext, ReplicationOracle, Result, Timestamp,
};
use tracing::debug;

/// Database of the markers collection
pub const MIN_VALID_DB: &str = "local";
/// Collection of the markers document
pub const MIN_VALID_COLLECTION: &str = "replset.minvalid";
/// `_id` of the singleton
pub const MIN_VALID_ID: &str = "minValid";

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// The markers singleton
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinValidDocument {
    /// Singleton key
    #[serde(rename = "_id")]
    pub id: String,
    /// Timestamp part of minValid
    #[serde(rename = "ts")]
    pub min_valid_timestamp: Timestamp,
    /// Term part of minValid
    #[serde(rename = "t")]
    pub min_valid_term: i64,
    /// Boundary of the last applied batch
    #[serde(rename = "begin", default, skip_serializing_if = "Option::is_none")]
    pub applied_through: Option<OpTime>,
    /// Legacy oplog truncation point
    #[serde(
        rename = "oplogDeleteFromPoint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub old_oplog_delete_from_point: Option<Timestamp>,
    /// Set while an initial sync is in progress
    #[serde(rename = "doingInitialSync", default, skip_serializing_if = "is_false")]
    pub initial_sync_flag: bool,
}

impl Default for MinValidDocument {
    fn default() -> Self {
        Self {
            id: MIN_VALID_ID.to_string(),
            min_valid_timestamp: Timestamp::NULL,
            min_valid_term: OpTime::UNINITIALIZED_TERM,
            applied_through: None,
            old_oplog_delete_from_point: None,
            initial_sync_flag: false,
        }
    }
}

impl MinValidDocument {
    /// minValid as an optime
    pub fn min_valid(&self) -> OpTime {
        OpTime::new(self.min_valid_timestamp, self.min_valid_term)
    }

    fn set_min_valid(&mut self, optime: OpTime) {
        self.min_valid_timestamp = optime.timestamp;
        self.min_valid_term = optime.term;
    }

    fn to_document(&self) -> Result<Document> {
        doc(serde_json::to_value(self)?)
    }

    fn from_document(document: Document) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(document))?)
    }
}

/// Store for the consistency markers singleton
pub struct ConsistencyMarkers {
    storage: Arc<StorageInterface>,
    oracle: Arc<dyn ReplicationOracle>,
    namespace: Namespace,
    write_lock: Mutex<()>,
}

impl ConsistencyMarkers {
    /// Markers in the default namespace
    pub fn new(storage: Arc<StorageInterface>, oracle: Arc<dyn ReplicationOracle>) -> Self {
        Self::with_namespace(
            storage,
            oracle,
            Namespace::new(MIN_VALID_DB, MIN_VALID_COLLECTION),
        )
    }

    /// Markers in `namespace`
    pub fn with_namespace(
        storage: Arc<StorageInterface>,
        oracle: Arc<dyn ReplicationOracle>,
        namespace: Namespace,
    ) -> Self {
        Self {
            storage,
            oracle,
            namespace,
            write_lock: Mutex::new(()),
        }
    }

    /// Namespace of the singleton
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Create the collection and the singleton if missing
    ///
    /// The new document has a null minValid with uninitialized term and is
    /// written untimestamped.
    pub fn initialize_min_valid_document(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self
            .storage
            .collection(&self.namespace, &ReadContext::Latest)
            .is_none()
        {
            self.storage
                .create_collection(&self.namespace, CollectionOptions::default(), None)?;
        }
        if self.read(&ReadContext::Latest)?.is_some() {
            return Ok(());
        }
        debug!(namespace = %self.namespace, "initializing min valid document");
        self.write(&MinValidDocument::default(), None)
    }

    /// The singleton as of `ctx`, if it exists there
    pub fn get_min_valid_document(&self, ctx: &ReadContext) -> Result<Option<MinValidDocument>> {
        self.read(ctx)
    }

    fn read(&self, ctx: &ReadContext) -> Result<Option<MinValidDocument>> {
        self.storage
            .find_by_id(&self.namespace, &Value::from(MIN_VALID_ID), ctx)?
            .map(MinValidDocument::from_document)
            .transpose()
    }

    fn current(&self) -> Result<MinValidDocument> {
        self.read(&ReadContext::Latest)?.ok_or_else(|| {
            Error::NoSuchKey(format!("min valid document missing from {}", self.namespace))
        })
    }

    fn write(&self, document: &MinValidDocument, ts: Option<Timestamp>) -> Result<()> {
        self.storage
            .upsert_document(&self.namespace, document.to_document()?, ts)
    }

    fn update(&self, ts: Option<Timestamp>, mutate: impl FnOnce(&mut MinValidDocument)) -> Result<()> {
        self.update_if(ts, |_| true, mutate).map(|_| ())
    }

    /// Read-modify-write at `ts`
    ///
    /// `should` sees the latest document and returns false to skip the
    /// write. Returns whether anything was written.
    fn update_if(
        &self,
        ts: Option<Timestamp>,
        should: impl FnOnce(&MinValidDocument) -> bool,
        mutate: impl FnOnce(&mut MinValidDocument),
    ) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let current = self.current()?;
        if !should(&current) {
            return Ok(false);
        }
        let Some(ts) = ts else {
            let mut document = current;
            mutate(&mut document);
            self.write(&document, None)?;
            return Ok(true);
        };

        let id = Value::from(MIN_VALID_ID);
        let newer: Vec<Timestamp> = self
            .storage
            .version_timestamps(&self.namespace, &id)?
            .into_iter()
            .filter(|at| *at > ts)
            .collect();

        let mut document = self
            .read(&ReadContext::at(ts))?
            .unwrap_or_else(|| current.clone());
        let before = document.to_document()?;
        mutate(&mut document);
        let after = document.to_document()?;
        self.write(&document, Some(ts))?;

        for at in newer {
            let ctx = ReadContext::at(at);
            let Some(mut version) = self.storage.find_by_id(&self.namespace, &id, &ctx)? else {
                continue;
            };
            if carry_forward(&before, &after, &mut version) {
                debug!(ts = %ts, version = %at, "carrying min valid change into newer version");
                self.storage
                    .upsert_document(&self.namespace, version, Some(at))?;
            }
        }
        Ok(true)
    }

    // ========================================================================
    // Initial sync flag
    // ========================================================================

    /// True while an initial sync is in progress
    pub fn get_initial_sync_flag(&self) -> Result<bool> {
        Ok(self.current()?.initial_sync_flag)
    }

    /// Mark an initial sync in progress, untimestamped
    pub fn set_initial_sync_flag(&self) -> Result<()> {
        debug!("setting initial sync flag");
        self.update(None, |d| d.initial_sync_flag = true)
    }

    /// Clear the initial sync flag
    ///
    /// Also moves minValid and appliedThrough to the last applied optime,
    /// written at that optime's timestamp.
    pub fn clear_initial_sync_flag(&self) -> Result<()> {
        let optime = self.oracle.my_last_applied_optime();
        debug!(optime = %optime, "clearing initial sync flag");
        if optime.is_null() {
            return self.update(None, |d| d.initial_sync_flag = false);
        }
        self.update(optime.timestamp.non_null(), |d| {
            d.initial_sync_flag = false;
            d.set_min_valid(optime);
            d.applied_through = Some(optime);
        })
    }

    // ========================================================================
    // minValid
    // ========================================================================

    /// Current minValid
    pub fn get_min_valid(&self) -> Result<OpTime> {
        Ok(self.current()?.min_valid())
    }

    /// Set minValid unconditionally
    pub fn set_min_valid(&self, optime: OpTime) -> Result<()> {
        debug!(optime = %optime, "setting min valid");
        self.update(optime.timestamp.non_null(), |d| d.set_min_valid(optime))
    }

    /// Raise minValid to `optime` if it is strictly greater than the
    /// current value
    pub fn set_min_valid_to_at_least(&self, optime: OpTime) -> Result<()> {
        let raised = self.update_if(
            optime.timestamp.non_null(),
            |d| optime > d.min_valid(),
            |d| d.set_min_valid(optime),
        )?;
        if raised {
            debug!(optime = %optime, "raised min valid");
        } else {
            debug!(requested = %optime, "min valid already at or past requested optime");
        }
        Ok(())
    }

    // ========================================================================
    // appliedThrough
    // ========================================================================

    /// Last applied batch boundary, null if unset
    pub fn get_applied_through(&self) -> Result<OpTime> {
        Ok(self.current()?.applied_through.unwrap_or_default())
    }

    /// Record the last applied batch boundary at its own timestamp
    ///
    /// Only moves forward; use [`clear_applied_through`] to go back.
    ///
    /// [`clear_applied_through`]: Self::clear_applied_through
    pub fn set_applied_through(&self, optime: OpTime) -> Result<()> {
        let advanced = self.update_if(
            optime.timestamp.non_null(),
            |d| d.applied_through.map_or(true, |current| optime > current),
            |d| d.applied_through = Some(optime),
        )?;
        if advanced {
            debug!(optime = %optime, "set applied through");
        } else {
            debug!(requested = %optime, "applied through already at or past requested optime");
        }
        Ok(())
    }

    /// Remove the batch boundary as of `ts`
    pub fn clear_applied_through(&self, ts: Timestamp) -> Result<()> {
        debug!(ts = %ts, "clearing applied through");
        self.update(ts.non_null(), |d| d.applied_through = None)
    }

    // ========================================================================
    // Legacy truncation point
    // ========================================================================

    /// Legacy oplog truncation point, null if unset
    pub fn get_old_oplog_delete_from_point(&self) -> Result<Timestamp> {
        Ok(self
            .current()?
            .old_oplog_delete_from_point
            .unwrap_or(Timestamp::NULL))
    }

    /// Record a legacy oplog truncation point, untimestamped
    pub fn set_old_oplog_delete_from_point(&self, ts: Timestamp) -> Result<()> {
        self.update(None, |d| d.old_oplog_delete_from_point = Some(ts))
    }

    /// Remove the legacy oplog truncation point if present
    pub fn remove_old_oplog_delete_from_point(&self) -> Result<()> {
        let removed = self.update_if(
            None,
            |d| d.old_oplog_delete_from_point.is_some(),
            |d| d.old_oplog_delete_from_point = None,
        )?;
        if removed {
            debug!("removed old oplog delete from point");
        }
        Ok(())
    }

    /// Delete the singleton at every timestamp
    pub fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        debug!(namespace = %self.namespace, "resetting consistency markers");
        self.storage
            .delete_document(&self.namespace, &Value::from(MIN_VALID_ID), None)
            .map(|_| ())
    }
}

/// Apply the `before` -> `after` change to a newer version of the document
///
/// A field is carried only while the newer version still holds the value
/// it had in `before`. Returns true if `newer` changed.
fn carry_forward(before: &Document, after: &Document, newer: &mut Document) -> bool {
    let removed = before.keys().filter(|key| !after.contains_key(*key));
    let mut changed = false;
    for key in after.keys().chain(removed) {
        let (was, now) = (before.get(key), after.get(key));
        if was == now || newer.get(key) != was {
            continue;
        }
        match now {
            Some(value) => {
                newer.insert(key.clone(), value.clone());
            }
            None => {
                newer.remove(key);
            }
        }
        changed = true;
    }
    changed
}

impl std::fmt::Debug for ConsistencyMarkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistencyMarkers")
            .field("namespace", &self.namespace)
            .finish()
    }
}
