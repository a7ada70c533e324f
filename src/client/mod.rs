//! Retrying document-store client.
//!
//! [`Client`] exposes the usual CRUD entry points. Each one captures its
//! arguments in a closure that performs a single store call, and hands that
//! closure to the retry [`Executor`] together with a snapshot of the client's
//! current [`RetryPolicy`] and its [`SkipList`].
//!
//! # Examples
//!
//! ```rust
//! use docstore_retry::testing::{InstantSleeper, MemoryStore, StoreError};
//! use docstore_retry::{doc, CallContext, Client, ErrorSentinel, NoopLogger, RetryPolicy, SkipList};
//! use std::time::Duration;
//!
//! let store = MemoryStore::new();
//! store.fail_next("insert_one", StoreError::unavailable("primary stepped down"));
//!
//! let client = Client::with_skip_list(
//!     store,
//!     "app",
//!     RetryPolicy::constant(Duration::from_millis(5)).with_max_attempts(3),
//!     SkipList::new().with(ErrorSentinel::equal_to(StoreError::NoDocuments)),
//! )?
//! .with_sleeper(InstantSleeper);
//!
//! let ctx = CallContext::background();
//! client.insert_one(&NoopLogger, &ctx, "users", doc!({ "_id": 1, "name": "ada" }), None)?;
//!
//! let found = client.find_one(&NoopLogger, &ctx, "users", doc!({ "name": "ada" }), None)?;
//! assert_eq!(found["_id"], 1);
//!
//! // A miss is skip-listed: one attempt, original error.
//! let missing = client.find_one(&NoopLogger, &ctx, "users", doc!({ "name": "bob" }), None);
//! assert!(missing.unwrap_err().is_aborted());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;

pub use error::{ClientError, OperationError};

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::cancel::CallContext;
use crate::logger::Logger;
use crate::retry::{Executor, PolicyError, RetryPolicy, Sleeper, SkipList, ThreadSleeper};
use crate::store::{
    AggregateOptions, Cursor, DeleteOptions, DeleteResult, Document, DocumentStore, FindOneOptions,
    FindOptions, InsertManyOptions, InsertManyResult, InsertOneOptions, InsertOneResult, Namespace,
    UpdateOptions, UpdateResult,
};

/// A document-store client whose every call is retried under a policy.
///
/// The policy can be replaced at any time with
/// [`set_retry_policy`](Self::set_retry_policy). Replacement swaps the whole
/// policy; calls already running keep the policy they started with.
///
/// Errors come back as [`ClientError`]. A skip-listed failure is
/// `RetryError::Aborted` holding the [`OperationError`], not the bare store
/// error; [`ClientError::into_store_error`](crate::RetryError::into_store_error)
/// unwraps either case.
pub struct Client<S> {
    store: Arc<S>,
    database: String,
    policy: RwLock<Arc<RetryPolicy>>,
    skip_list: SkipList,
    sleeper: Arc<dyn Sleeper>,
}

impl<S: DocumentStore> Client<S> {
    /// Create a client that retries every failure.
    ///
    /// # Errors
    ///
    /// [`PolicyError`] if `policy` does not validate.
    pub fn new(
        store: S,
        database: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<Self, PolicyError> {
        Self::with_skip_list(store, database, policy, SkipList::new())
    }

    /// Create a client that never retries errors matching `skip_list`.
    ///
    /// # Errors
    ///
    /// [`PolicyError`] if `policy` does not validate.
    pub fn with_skip_list(
        store: S,
        database: impl Into<String>,
        policy: RetryPolicy,
        skip_list: SkipList,
    ) -> Result<Self, PolicyError> {
        Self::from_shared(Arc::new(store), database, policy, skip_list)
    }

    /// Create a client over a store handle shared with other owners.
    ///
    /// # Errors
    ///
    /// [`PolicyError`] if `policy` does not validate.
    pub fn from_shared(
        store: Arc<S>,
        database: impl Into<String>,
        policy: RetryPolicy,
        skip_list: SkipList,
    ) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self {
            store,
            database: database.into(),
            policy: RwLock::new(Arc::new(policy)),
            skip_list,
            sleeper: Arc::new(ThreadSleeper),
        })
    }

    /// Wait between attempts with `sleeper` instead of blocking the thread.
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Shared handle to the underlying store.
    pub fn store_handle(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    /// Name of the target database.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The skip-list applied to every call.
    pub fn skip_list(&self) -> &SkipList {
        &self.skip_list
    }

    /// The policy new calls will use.
    pub fn retry_policy(&self) -> Arc<RetryPolicy> {
        let guard = self
            .policy
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the policy for calls that start after this returns.
    ///
    /// # Errors
    ///
    /// [`PolicyError`] if `policy` does not validate; the current policy is
    /// kept.
    pub fn set_retry_policy(&self, policy: RetryPolicy) -> Result<(), PolicyError> {
        policy.validate()?;
        let policy = Arc::new(policy);
        let mut guard = self
            .policy
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = policy;
        Ok(())
    }

    /// Namespace for `collection` in this client's database.
    pub fn namespace(&self, collection: &str) -> Namespace {
        Namespace::new(self.database.as_str(), collection)
    }

    fn execute<T, F>(
        &self,
        logger: &dyn Logger,
        ctx: &CallContext,
        operation: &'static str,
        ns: &Namespace,
        mut call: F,
    ) -> Result<T, ClientError<S::Error>>
    where
        F: FnMut(&S) -> Result<T, S::Error>,
    {
        let policy = self.retry_policy();
        let logger = logger.with(&[("operation", &operation), ("namespace", ns)]);
        Executor::new(&*logger, &policy)
            .skip_list(&self.skip_list)
            .sleeper(&*self.sleeper)
            .context(ctx.clone())
            .run(|| call(self.store.as_ref()).map_err(|e| OperationError::new(operation, ns.clone(), e)))
    }

    /// All documents in `collection` matching `filter`.
    pub fn find(
        &self,
        logger: &dyn Logger,
        ctx: &CallContext,
        collection: &str,
        filter: Document,
        options: Option<FindOptions>,
    ) -> Result<Cursor, ClientError<S::Error>> {
        let ns = self.namespace(collection);
        let options = options.unwrap_or_default();
        self.execute(logger, ctx, "find", &ns, |store| {
            store.find(ctx, &ns, &filter, &options)
        })
    }

    /// The first document in `collection` matching `filter`.
    pub fn find_one(
        &self,
        logger: &dyn Logger,
        ctx: &CallContext,
        collection: &str,
        filter: Document,
        options: Option<FindOneOptions>,
    ) -> Result<Document, ClientError<S::Error>> {
        let ns = self.namespace(collection);
        let options = options.unwrap_or_default();
        self.execute(logger, ctx, "find_one", &ns, |store| {
            store.find_one(ctx, &ns, &filter, &options)
        })
    }

    /// Insert `document` into `collection`.
    ///
    /// A retried insert may run more than once; give documents an explicit
    /// `_id` if duplicates matter.
    pub fn insert_one(
        &self,
        logger: &dyn Logger,
        ctx: &CallContext,
        collection: &str,
        document: Document,
        options: Option<InsertOneOptions>,
    ) -> Result<InsertOneResult, ClientError<S::Error>> {
        let ns = self.namespace(collection);
        let options = options.unwrap_or_default();
        self.execute(logger, ctx, "insert_one", &ns, |store| {
            store.insert_one(ctx, &ns, &document, &options)
        })
    }

    /// Insert `documents` into `collection`.
    pub fn insert_many(
        &self,
        logger: &dyn Logger,
        ctx: &CallContext,
        collection: &str,
        documents: Vec<Document>,
        options: Option<InsertManyOptions>,
    ) -> Result<InsertManyResult, ClientError<S::Error>> {
        let ns = self.namespace(collection);
        let options = options.unwrap_or_default();
        self.execute(logger, ctx, "insert_many", &ns, |store| {
            store.insert_many(ctx, &ns, &documents, &options)
        })
    }

    /// Apply `update` to the first document in `collection` matching `filter`.
    pub fn update_one(
        &self,
        logger: &dyn Logger,
        ctx: &CallContext,
        collection: &str,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> Result<UpdateResult, ClientError<S::Error>> {
        let ns = self.namespace(collection);
        let options = options.unwrap_or_default();
        self.execute(logger, ctx, "update_one", &ns, |store| {
            store.update_one(ctx, &ns, &filter, &update, &options)
        })
    }

    /// Apply `update` to every document in `collection` matching `filter`.
    pub fn update_many(
        &self,
        logger: &dyn Logger,
        ctx: &CallContext,
        collection: &str,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> Result<UpdateResult, ClientError<S::Error>> {
        let ns = self.namespace(collection);
        let options = options.unwrap_or_default();
        self.execute(logger, ctx, "update_many", &ns, |store| {
            store.update_many(ctx, &ns, &filter, &update, &options)
        })
    }

    /// Delete the first document in `collection` matching `filter`.
    pub fn delete_one(
        &self,
        logger: &dyn Logger,
        ctx: &CallContext,
        collection: &str,
        filter: Document,
        options: Option<DeleteOptions>,
    ) -> Result<DeleteResult, ClientError<S::Error>> {
        let ns = self.namespace(collection);
        let options = options.unwrap_or_default();
        self.execute(logger, ctx, "delete_one", &ns, |store| {
            store.delete_one(ctx, &ns, &filter, &options)
        })
    }

    /// Delete every document in `collection` matching `filter`.
    pub fn delete_many(
        &self,
        logger: &dyn Logger,
        ctx: &CallContext,
        collection: &str,
        filter: Document,
        options: Option<DeleteOptions>,
    ) -> Result<DeleteResult, ClientError<S::Error>> {
        let ns = self.namespace(collection);
        let options = options.unwrap_or_default();
        self.execute(logger, ctx, "delete_many", &ns, |store| {
            store.delete_many(ctx, &ns, &filter, &options)
        })
    }

    /// Run `pipeline` against `collection`.
    pub fn aggregate(
        &self,
        logger: &dyn Logger,
        ctx: &CallContext,
        collection: &str,
        pipeline: Vec<Document>,
        options: Option<AggregateOptions>,
    ) -> Result<Cursor, ClientError<S::Error>> {
        let ns = self.namespace(collection);
        let options = options.unwrap_or_default();
        self.execute(logger, ctx, "aggregate", &ns, |store| {
            store.aggregate(ctx, &ns, &pipeline, &options)
        })
    }
}

impl<S> fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let policy = self
            .policy
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_else(|poisoned| Arc::clone(&poisoned.into_inner()));
        f.debug_struct("Client")
            .field("database", &self.database)
            .field("policy", &policy)
            .field("skip_list", &self.skip_list)
            .finish_non_exhaustive()
    }
}
