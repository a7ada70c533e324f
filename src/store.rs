//! The document-store collaborator.
//!
//! [`DocumentStore`] is the boundary to the database driver: connection
//! management, query execution and the wire protocol all live behind it. The
//! client facade only ever calls these methods, once per attempt.
//!
//! Documents, filters, update specifications and pipeline stages are JSON
//! objects ([`Document`]). The option structs play the role of the driver's
//! options bag; every field is optional and `Default` means "driver default".

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CallContext;

/// A document, filter, update specification or pipeline stage.
pub type Document = serde_json::Map<String, Value>;

/// Build a [`Document`] from a `serde_json::json!` object literal.
///
/// Non-object values produce an empty document.
///
/// ```rust
/// use docstore_retry::doc;
///
/// let filter = doc!({ "status": "active" });
/// assert_eq!(filter["status"], "active");
/// ```
#[macro_export]
macro_rules! doc {
    ($($json:tt)+) => {
        match ::serde_json::json!($($json)+) {
            ::serde_json::Value::Object(map) => map,
            _ => ::serde_json::Map::new(),
        }
    };
}

/// Database plus collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    /// Database name.
    pub db: String,
    /// Collection name.
    pub coll: String,
}

impl Namespace {
    /// Create a namespace.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// Documents returned by a query or aggregation.
///
/// Iterating drains the buffered documents in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    documents: VecDeque<Document>,
}

impl Cursor {
    /// A cursor over `documents`.
    pub fn new(documents: impl IntoIterator<Item = Document>) -> Self {
        Self {
            documents: documents.into_iter().collect(),
        }
    }

    /// Documents not yet consumed.
    pub fn remaining(&self) -> usize {
        self.documents.len()
    }

    /// Consume the cursor into a vector.
    pub fn collect_all(self) -> Vec<Document> {
        self.documents.into()
    }
}

impl Iterator for Cursor {
    type Item = Document;

    fn next(&mut self) -> Option<Self::Item> {
        self.documents.pop_front()
    }
}

/// Result of inserting one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertOneResult {
    /// `_id` of the inserted document.
    pub inserted_id: Value,
}

/// Result of inserting many documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertManyResult {
    /// `_id` of each inserted document, keyed by its position in the input.
    pub inserted_ids: BTreeMap<usize, Value>,
}

/// Result of an update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Documents matching the filter.
    pub matched_count: u64,
    /// Documents actually changed.
    pub modified_count: u64,
    /// `_id` of a document created by an upsert.
    pub upserted_id: Option<Value>,
}

/// Result of a delete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteResult {
    /// Documents removed.
    pub deleted_count: u64,
}

/// Options for [`DocumentStore::find`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
    /// Number of matching documents to skip.
    pub skip: Option<u64>,
    /// Sort specification.
    pub sort: Option<Document>,
    /// Fields to include or exclude.
    pub projection: Option<Document>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
}

/// Options for [`DocumentStore::find_one`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOneOptions {
    /// Number of matching documents to skip.
    pub skip: Option<u64>,
    /// Sort specification.
    pub sort: Option<Document>,
    /// Fields to include or exclude.
    pub projection: Option<Document>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
}

/// Options for [`DocumentStore::insert_one`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertOneOptions {
    /// Skip schema validation on the server.
    pub bypass_document_validation: Option<bool>,
}

/// Options for [`DocumentStore::insert_many`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertManyOptions {
    /// Skip schema validation on the server.
    pub bypass_document_validation: Option<bool>,
    /// Stop at the first failed insert. Drivers default to `true`.
    pub ordered: Option<bool>,
}

/// Options for the update operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// Insert a document when nothing matches.
    pub upsert: Option<bool>,
    /// Skip schema validation on the server.
    pub bypass_document_validation: Option<bool>,
}

/// Options for the delete operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Index hint.
    pub hint: Option<Document>,
}

/// Options for [`DocumentStore::aggregate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateOptions {
    /// Allow stages to spill to disk.
    pub allow_disk_use: Option<bool>,
    /// Cursor batch size.
    pub batch_size: Option<u32>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
}

/// A document database driver.
///
/// Every method performs exactly one round trip and reports failures through
/// [`Self::Error`]. Implementations should honor `ctx` for their own I/O; the
/// retry layer separately honors it between attempts.
pub trait DocumentStore: Send + Sync {
    /// Driver error.
    type Error: std::error::Error + Send + Sync + 'static;

    /// All documents matching `filter`.
    fn find(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        filter: &Document,
        options: &FindOptions,
    ) -> Result<Cursor, Self::Error>;

    /// The first document matching `filter`.
    ///
    /// A miss is an error, like the single-result API of document drivers,
    /// which makes "no documents" a natural skip-list entry.
    fn find_one(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        filter: &Document,
        options: &FindOneOptions,
    ) -> Result<Document, Self::Error>;

    /// Insert one document.
    fn insert_one(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        document: &Document,
        options: &InsertOneOptions,
    ) -> Result<InsertOneResult, Self::Error>;

    /// Insert many documents.
    fn insert_many(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        documents: &[Document],
        options: &InsertManyOptions,
    ) -> Result<InsertManyResult, Self::Error>;

    /// Update the first document matching `filter`.
    fn update_one(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult, Self::Error>;

    /// Update every document matching `filter`.
    fn update_many(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult, Self::Error>;

    /// Delete the first document matching `filter`.
    fn delete_one(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        filter: &Document,
        options: &DeleteOptions,
    ) -> Result<DeleteResult, Self::Error>;

    /// Delete every document matching `filter`.
    fn delete_many(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        filter: &Document,
        options: &DeleteOptions,
    ) -> Result<DeleteResult, Self::Error>;

    /// Run an aggregation pipeline.
    fn aggregate(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        pipeline: &[Document],
        options: &AggregateOptions,
    ) -> Result<Cursor, Self::Error>;
}
