//! Replicated operations
//!
//! An [`Operation`] is one entry of an applyOps batch: a document insert,
//! update or delete, or a catalog command. The serialized field names follow
//! the replication log layout (`op`, `ns`, `ui`, `o`, `o2`, `ts`, `t`, `h`).

use serde::{Deserialize, Serialize};
use tidemark_catalog::{CollectionOptions, IndexSpec};
use tidemark_core::{CollectionId, Document, Namespace, Timestamp};

/// Catalog command carried by a command operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    /// Create `collection` in the operation's database
    Create {
        /// Collection name
        collection: String,
        /// Creation options
        #[serde(default)]
        options: CollectionOptions,
    },
    /// Drop `collection`
    Drop {
        /// Collection name
        collection: String,
    },
    /// Rename a collection
    RenameCollection {
        /// Current name
        from: Namespace,
        /// New name
        to: Namespace,
    },
    /// Create indexes on `collection`
    CreateIndexes {
        /// Collection name
        collection: String,
        /// Index declarations
        indexes: Vec<IndexSpec>,
    },
    /// Drop an index by name (`*` drops all but `_id_`)
    DropIndexes {
        /// Collection name
        collection: String,
        /// Index name
        index: String,
    },
    /// Nested batch
    ApplyOps(Vec<Operation>),
    /// Drop the operation's database
    DropDatabase,
}

/// What an operation does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum OperationKind {
    /// Insert one document
    #[serde(rename = "i")]
    Insert {
        /// Document to insert
        #[serde(rename = "o")]
        document: Document,
    },
    /// Insert several documents, each at its own timestamp
    #[serde(rename = "gi")]
    GroupedInsert {
        /// Documents to insert
        #[serde(rename = "o")]
        documents: Vec<Document>,
        /// Per-document timestamps, parallel to `documents`
        #[serde(rename = "tss", default)]
        timestamps: Vec<Timestamp>,
    },
    /// Update the document selected by `filter._id`
    #[serde(rename = "u")]
    Update {
        /// Selector, must carry `_id`
        #[serde(rename = "o2")]
        filter: Document,
        /// Modifier or replacement document
        #[serde(rename = "o")]
        modifier: Document,
        /// Create the document when missing
        #[serde(rename = "b", default)]
        upsert: bool,
    },
    /// Delete the document selected by `filter._id`
    #[serde(rename = "d")]
    Delete {
        /// Selector, must carry `_id`
        #[serde(rename = "o")]
        filter: Document,
    },
    /// Catalog command
    #[serde(rename = "c")]
    Command {
        /// The command
        #[serde(rename = "o")]
        command: Command,
    },
    /// No-op marker
    #[serde(rename = "n")]
    Noop {
        /// Free-form payload
        #[serde(rename = "o", default)]
        message: Document,
    },
}

/// One replicated operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Kind and payload
    #[serde(flatten)]
    pub kind: OperationKind,
    /// Target namespace (`db.$cmd` for commands)
    #[serde(rename = "ns")]
    pub namespace: Namespace,
    /// Target collection id
    #[serde(rename = "ui", default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<CollectionId>,
    /// Caller-supplied commit timestamp
    #[serde(rename = "ts", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    /// Term the operation was written in
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub term: Option<i64>,
    /// Legacy log-entry hash
    #[serde(rename = "h", default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<i64>,
}

impl Operation {
    /// Operation of `kind` on `namespace`
    pub fn new(kind: OperationKind, namespace: Namespace) -> Self {
        Self {
            kind,
            namespace,
            collection_id: None,
            timestamp: None,
            term: None,
            hash: None,
        }
    }

    /// Insert `document` into `ns`
    pub fn insert(ns: &Namespace, document: Document) -> Self {
        Self::new(OperationKind::Insert { document }, ns.clone())
    }

    /// Insert each document at its paired timestamp
    pub fn grouped_insert(ns: &Namespace, documents: Vec<(Timestamp, Document)>) -> Self {
        let (timestamps, documents) = documents.into_iter().unzip();
        Self::new(
            OperationKind::GroupedInsert {
                documents,
                timestamps,
            },
            ns.clone(),
        )
    }

    /// Update the document `filter` selects
    pub fn update(ns: &Namespace, filter: Document, modifier: Document) -> Self {
        Self::new(
            OperationKind::Update {
                filter,
                modifier,
                upsert: false,
            },
            ns.clone(),
        )
    }

    /// Update, creating the document when missing
    pub fn upsert(ns: &Namespace, filter: Document, modifier: Document) -> Self {
        Self::new(
            OperationKind::Update {
                filter,
                modifier,
                upsert: true,
            },
            ns.clone(),
        )
    }

    /// Delete the document `filter` selects
    pub fn delete(ns: &Namespace, filter: Document) -> Self {
        Self::new(OperationKind::Delete { filter }, ns.clone())
    }

    /// Command against `db`
    pub fn command(db: &str, command: Command) -> Self {
        Self::new(
            OperationKind::Command { command },
            Namespace::command_ns_for(db),
        )
    }

    /// Empty applyOps at `ts`, used to close a batch
    pub fn apply_ops_marker(db: &str, ts: Timestamp) -> Self {
        let mut op = Self::command(db, Command::ApplyOps(Vec::new()));
        op.timestamp = Some(ts);
        op
    }

    /// Set the target collection id
    pub fn with_collection_id(mut self, id: CollectionId) -> Self {
        self.collection_id = Some(id);
        self
    }

    /// Set the commit timestamp and term
    pub fn at(mut self, ts: impl Into<Timestamp>, term: i64) -> Self {
        self.timestamp = Some(ts.into());
        self.term = Some(term);
        self
    }

    /// True for catalog commands
    pub fn is_command(&self) -> bool {
        matches!(self.kind, OperationKind::Command { .. })
    }

    /// True for inserts, updates and deletes
    pub fn is_crud(&self) -> bool {
        matches!(
            self.kind,
            OperationKind::Insert { .. }
                | OperationKind::GroupedInsert { .. }
                | OperationKind::Update { .. }
                | OperationKind::Delete { .. }
        )
    }

    /// True for an applyOps command with no operations
    pub fn is_empty_apply_ops(&self) -> bool {
        matches!(
            &self.kind,
            OperationKind::Command {
                command: Command::ApplyOps(ops)
            } if ops.is_empty()
        )
    }

    /// Short name of the kind, for logging
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            OperationKind::Insert { .. } => "insert",
            OperationKind::GroupedInsert { .. } => "groupedInsert",
            OperationKind::Update { .. } => "update",
            OperationKind::Delete { .. } => "delete",
            OperationKind::Noop { .. } => "noop",
            OperationKind::Command { command } => match command {
                Command::Create { .. } => "create",
                Command::Drop { .. } => "drop",
                Command::RenameCollection { .. } => "renameCollection",
                Command::CreateIndexes { .. } => "createIndexes",
                Command::DropIndexes { .. } => "dropIndexes",
                Command::ApplyOps(_) => "applyOps",
                Command::DropDatabase => "dropDatabase",
            },
        }
    }
}
