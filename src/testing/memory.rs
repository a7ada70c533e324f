//! In-memory document store with scripted failures.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use crate::cancel::{CallContext, CancelReason};
use crate::store::{
    AggregateOptions, Cursor, DeleteOptions, DeleteResult, Document, DocumentStore, FindOneOptions,
    FindOptions, InsertManyOptions, InsertManyResult, InsertOneOptions, InsertOneResult, Namespace,
    UpdateOptions, UpdateResult,
};

/// Errors raised by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// `find_one` matched nothing.
    NoDocuments,
    /// The store could not serve the request; usually worth retrying.
    Unavailable(String),
    /// An insert reused an existing `_id`.
    DuplicateKey(String),
    /// The update specification was rejected.
    InvalidUpdate(String),
    /// The aggregation pipeline was rejected.
    InvalidPipeline(String),
    /// The call's context was done before the store ran.
    Cancelled(CancelReason),
}

impl StoreError {
    /// Shorthand for [`StoreError::Unavailable`].
    pub fn unavailable(msg: impl Into<String>) -> Self {
        StoreError::Unavailable(msg.into())
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NoDocuments => write!(f, "no documents in result"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
            StoreError::DuplicateKey(id) => write!(f, "duplicate key: _id {}", id),
            StoreError::InvalidUpdate(msg) => write!(f, "invalid update: {}", msg),
            StoreError::InvalidPipeline(msg) => write!(f, "invalid pipeline: {}", msg),
            StoreError::Cancelled(reason) => write!(f, "{}", reason),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Cancelled(reason) => Some(reason),
            _ => None,
        }
    }
}

/// A [`DocumentStore`] backed by in-process collections.
///
/// Filters support top-level equality plus `$eq`, `$ne`, `$gt`, `$gte`,
/// `$lt`, `$lte`, `$in` and `$exists`. Updates support `$set`, `$unset` and
/// `$inc`. Pipelines support `$match`, `$sort`, `$skip`, `$limit` and
/// `$count`.
///
/// Failures are scripted per operation name (`"find"`, `"insert_one"`, ...)
/// with [`fail_next`](Self::fail_next); each scripted error is consumed by
/// one call, before the call touches any data.
///
/// ```rust
/// use docstore_retry::testing::{MemoryStore, StoreError};
/// use docstore_retry::{doc, CallContext, DocumentStore, Namespace};
///
/// let store = MemoryStore::new();
/// let ns = Namespace::new("app", "users");
/// store.fail_times("find", 2, StoreError::unavailable("election"));
///
/// let ctx = CallContext::background();
/// let filter = doc!({});
/// assert!(store.find(&ctx, &ns, &filter, &Default::default()).is_err());
/// assert!(store.find(&ctx, &ns, &filter, &Default::default()).is_err());
/// assert!(store.find(&ctx, &ns, &filter, &Default::default()).is_ok());
/// assert_eq!(store.calls("find"), 3);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<Namespace, Vec<Document>>,
    faults: HashMap<String, VecDeque<StoreError>>,
    calls: HashMap<String, u32>,
    next_id: i64,
}

impl MemoryStore {
    /// An empty store with no scripted failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call to `operation` fail with `error`.
    pub fn fail_next(&self, operation: &str, error: StoreError) {
        self.fail_times(operation, 1, error);
    }

    /// Make the next `times` calls to `operation` fail with `error`.
    pub fn fail_times(&self, operation: &str, times: usize, error: StoreError) {
        let mut state = self.lock();
        let queue = state.faults.entry(operation.to_string()).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Drop every scripted failure.
    pub fn clear_failures(&self) {
        self.lock().faults.clear();
    }

    /// How many times `operation` has been called.
    pub fn calls(&self, operation: &str) -> u32 {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Calls across all operations.
    pub fn total_calls(&self) -> u32 {
        self.lock().calls.values().sum()
    }

    /// Replace the contents of a collection.
    pub fn seed(&self, ns: &Namespace, documents: impl IntoIterator<Item = Document>) {
        self.lock()
            .collections
            .insert(ns.clone(), documents.into_iter().collect());
    }

    /// Snapshot of a collection, in insertion order.
    pub fn documents(&self, ns: &Namespace) -> Vec<Document> {
        self.lock()
            .collections
            .get(ns)
            .cloned()
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Count the call, honor the context, then consume a scripted failure.
    fn begin(&self, ctx: &CallContext, operation: &str) -> Result<MutexGuard<'_, State>, StoreError> {
        let mut state = self.lock();
        *state.calls.entry(operation.to_string()).or_insert(0) += 1;
        if let Some(reason) = ctx.err() {
            return Err(StoreError::Cancelled(reason));
        }
        if let Some(error) = state.faults.get_mut(operation).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(state)
    }
}

impl State {
    fn collection(&mut self, ns: &Namespace) -> &mut Vec<Document> {
        self.collections.entry(ns.clone()).or_default()
    }

    fn assign_id(&mut self, document: &Document) -> Document {
        let mut document = document.clone();
        if !document.contains_key("_id") {
            self.next_id += 1;
            document.insert("_id".to_string(), Value::from(self.next_id));
        }
        document
    }

    fn insert(&mut self, ns: &Namespace, document: &Document) -> Result<Value, StoreError> {
        let document = self.assign_id(document);
        let id = document.get("_id").cloned().unwrap_or(Value::Null);
        let collection = self.collection(ns);
        if collection.iter().any(|d| d.get("_id") == Some(&id)) {
            return Err(StoreError::DuplicateKey(id.to_string()));
        }
        collection.push(document);
        Ok(id)
    }

    fn update(
        &mut self,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        options: &UpdateOptions,
        many: bool,
    ) -> Result<UpdateResult, StoreError> {
        validate_update(update)?;
        let mut result = UpdateResult::default();
        for document in self.collection(ns).iter_mut() {
            if !matches_filter(document, filter) {
                continue;
            }
            result.matched_count += 1;
            if apply_update(document, update) {
                result.modified_count += 1;
            }
            if !many {
                break;
            }
        }

        if result.matched_count == 0 && options.upsert == Some(true) {
            let mut seed: Document = filter
                .iter()
                .filter(|(key, value)| !key.starts_with('$') && !is_operator_object(value))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            apply_update(&mut seed, update);
            result.upserted_id = Some(self.insert(ns, &seed)?);
        }
        Ok(result)
    }

    fn delete(&mut self, ns: &Namespace, filter: &Document, many: bool) -> DeleteResult {
        let collection = self.collection(ns);
        let before = collection.len();
        if many {
            collection.retain(|d| !matches_filter(d, filter));
        } else if let Some(pos) = collection.iter().position(|d| matches_filter(d, filter)) {
            collection.remove(pos);
        }
        DeleteResult {
            deleted_count: (before - collection.len()) as u64,
        }
    }

    fn query(&self, ns: &Namespace, filter: &Document) -> Vec<Document> {
        self.collections
            .get(ns)
            .map(|docs| {
                docs.iter()
                    .filter(|d| matches_filter(d, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl DocumentStore for MemoryStore {
    type Error = StoreError;

    fn find(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        filter: &Document,
        options: &FindOptions,
    ) -> Result<Cursor, StoreError> {
        let state = self.begin(ctx, "find")?;
        let mut docs = state.query(ns, filter);
        if let Some(sort) = &options.sort {
            sort_documents(&mut docs, sort);
        }
        let docs = window(docs, options.skip, options.limit);
        Ok(Cursor::new(
            docs.into_iter()
                .map(|d| project(d, options.projection.as_ref())),
        ))
    }

    fn find_one(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        filter: &Document,
        options: &FindOneOptions,
    ) -> Result<Document, StoreError> {
        let state = self.begin(ctx, "find_one")?;
        let mut docs = state.query(ns, filter);
        if let Some(sort) = &options.sort {
            sort_documents(&mut docs, sort);
        }
        window(docs, options.skip, Some(1))
            .into_iter()
            .next()
            .map(|d| project(d, options.projection.as_ref()))
            .ok_or(StoreError::NoDocuments)
    }

    fn insert_one(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        document: &Document,
        _options: &InsertOneOptions,
    ) -> Result<InsertOneResult, StoreError> {
        let mut state = self.begin(ctx, "insert_one")?;
        let inserted_id = state.insert(ns, document)?;
        Ok(InsertOneResult { inserted_id })
    }

    fn insert_many(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        documents: &[Document],
        options: &InsertManyOptions,
    ) -> Result<InsertManyResult, StoreError> {
        let mut state = self.begin(ctx, "insert_many")?;
        let ordered = options.ordered.unwrap_or(true);
        let mut result = InsertManyResult::default();
        let mut first_error = None;
        for (index, document) in documents.iter().enumerate() {
            match state.insert(ns, document) {
                Ok(id) => {
                    result.inserted_ids.insert(index, id);
                }
                Err(error) if ordered => return Err(error),
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(result),
        }
    }

    fn update_one(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult, StoreError> {
        let mut state = self.begin(ctx, "update_one")?;
        state.update(ns, filter, update, options, false)
    }

    fn update_many(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult, StoreError> {
        let mut state = self.begin(ctx, "update_many")?;
        state.update(ns, filter, update, options, true)
    }

    fn delete_one(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        filter: &Document,
        _options: &DeleteOptions,
    ) -> Result<DeleteResult, StoreError> {
        let mut state = self.begin(ctx, "delete_one")?;
        Ok(state.delete(ns, filter, false))
    }

    fn delete_many(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        filter: &Document,
        _options: &DeleteOptions,
    ) -> Result<DeleteResult, StoreError> {
        let mut state = self.begin(ctx, "delete_many")?;
        Ok(state.delete(ns, filter, true))
    }

    fn aggregate(
        &self,
        ctx: &CallContext,
        ns: &Namespace,
        pipeline: &[Document],
        _options: &AggregateOptions,
    ) -> Result<Cursor, StoreError> {
        let state = self.begin(ctx, "aggregate")?;
        let mut docs = state.query(ns, &Document::new());
        for stage in pipeline {
            docs = run_stage(docs, stage)?;
        }
        Ok(Cursor::new(docs))
    }
}

fn run_stage(docs: Vec<Document>, stage: &Document) -> Result<Vec<Document>, StoreError> {
    let mut entries = stage.iter();
    let (name, arg) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(StoreError::InvalidPipeline(
                "each stage must have exactly one key".to_string(),
            ))
        }
    };
    let invalid = || StoreError::InvalidPipeline(format!("bad argument to {}", name));

    match name.as_str() {
        "$match" => {
            let filter = arg.as_object().ok_or_else(invalid)?;
            Ok(docs.into_iter().filter(|d| matches_filter(d, filter)).collect())
        }
        "$sort" => {
            let spec = arg.as_object().ok_or_else(invalid)?;
            let mut docs = docs;
            sort_documents(&mut docs, spec);
            Ok(docs)
        }
        "$skip" => {
            let n = arg.as_u64().ok_or_else(invalid)?;
            Ok(window(docs, Some(n), None))
        }
        "$limit" => {
            let n = arg.as_u64().ok_or_else(invalid)?;
            Ok(window(docs, None, Some(n)))
        }
        "$count" => {
            let field = arg.as_str().ok_or_else(invalid)?;
            let mut out = Document::new();
            out.insert(field.to_string(), Value::from(docs.len() as u64));
            Ok(vec![out])
        }
        other => Err(StoreError::InvalidPipeline(format!(
            "unsupported stage {}",
            other
        ))),
    }
}

fn is_operator_object(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.keys().any(|k| k.starts_with('$')))
}

fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(field, condition)| {
        let actual = document.get(field);
        match condition.as_object() {
            Some(ops) if is_operator_object(condition) => {
                ops.iter().all(|(op, operand)| matches_operator(actual, op, operand))
            }
            _ => actual == Some(condition),
        }
    })
}

fn matches_operator(actual: Option<&Value>, op: &str, operand: &Value) -> bool {
    let ordering = || actual.and_then(|a| compare_values(a, operand));
    match op {
        "$eq" => actual == Some(operand),
        "$ne" => actual != Some(operand),
        "$gt" => ordering() == Some(Ordering::Greater),
        "$gte" => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => ordering() == Some(Ordering::Less),
        "$lte" => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        "$in" => operand
            .as_array()
            .is_some_and(|candidates| actual.is_some_and(|a| candidates.contains(a))),
        "$exists" => actual.is_some() == operand.as_bool().unwrap_or(true),
        _ => false,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn validate_update(update: &Document) -> Result<(), StoreError> {
    if update.is_empty() {
        return Err(StoreError::InvalidUpdate("update document is empty".to_string()));
    }
    for (op, arg) in update {
        if !matches!(op.as_str(), "$set" | "$unset" | "$inc") {
            return Err(StoreError::InvalidUpdate(format!(
                "unsupported update operator {}",
                op
            )));
        }
        let fields = arg
            .as_object()
            .ok_or_else(|| StoreError::InvalidUpdate(format!("{} expects a document", op)))?;
        if op == "$inc" && fields.values().any(|v| !v.is_number()) {
            return Err(StoreError::InvalidUpdate("$inc expects numbers".to_string()));
        }
    }
    Ok(())
}

// Apply a validated update; returns true if the document changed.
fn apply_update(document: &mut Document, update: &Document) -> bool {
    let before = document.clone();
    for (op, arg) in update {
        let Some(fields) = arg.as_object() else {
            continue;
        };
        for (field, value) in fields {
            match op.as_str() {
                "$set" => {
                    document.insert(field.clone(), value.clone());
                }
                "$unset" => {
                    document.remove(field);
                }
                "$inc" => {
                    let current = document.get(field).cloned().unwrap_or(Value::from(0));
                    document.insert(field.clone(), add_numbers(&current, value));
                }
                _ => {}
            }
        }
    }
    *document != before
}

fn add_numbers(a: &Value, b: &Value) -> Value {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => Value::from(x.saturating_add(y)),
        _ => {
            let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
            serde_json::Number::from_f64(sum)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
    }
}

fn sort_documents(docs: &mut [Document], spec: &Document) {
    docs.sort_by(|a, b| {
        for (field, direction) in spec {
            let ord = match (a.get(field), b.get(field)) {
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ord = if direction.as_i64() == Some(-1) {
                ord.reverse()
            } else {
                ord
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn window(docs: Vec<Document>, skip: Option<u64>, limit: Option<u64>) -> Vec<Document> {
    let skip = usize::try_from(skip.unwrap_or(0)).unwrap_or(usize::MAX);
    let limit = match limit {
        Some(0) | None => usize::MAX,
        Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
    };
    docs.into_iter().skip(skip).take(limit).collect()
}

// Inclusion projection; `_id` is kept unless excluded explicitly.
fn project(document: Document, projection: Option<&Document>) -> Document {
    let Some(projection) = projection.filter(|p| !p.is_empty()) else {
        return document;
    };
    let included = |v: &Value| v.as_bool().unwrap_or_else(|| v.as_i64() != Some(0));
    document
        .into_iter()
        .filter(|(key, _)| match projection.get(key) {
            Some(flag) => included(flag),
            None => key == "_id",
        })
        .collect()
}
