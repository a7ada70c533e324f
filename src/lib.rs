//! # docstore-retry
//!
//! A retry-with-backoff engine and a document-store client built on it.
//!
//! Every database call is a fallible operation. The [`retry`] module runs such
//! operations under a [`RetryPolicy`], retrying transient failures after a
//! backoff wait and returning skip-listed failures untouched. The [`Client`]
//! facade wraps each CRUD call of a [`DocumentStore`] in that engine.
//!
//! ## Quick Example
//!
//! ```rust
//! use docstore_retry::testing::{InstantSleeper, MemoryStore, StoreError};
//! use docstore_retry::prelude::*;
//! use docstore_retry::doc;
//! use std::time::Duration;
//!
//! let store = MemoryStore::new();
//! store.fail_times("find", 2, StoreError::unavailable("no primary"));
//!
//! let client = Client::new(store, "shop", RetryPolicy::exponential(Duration::from_millis(20)))?
//!     .with_sleeper(InstantSleeper);
//!
//! let ctx = CallContext::with_timeout(Duration::from_secs(5));
//! let cursor = client.find(&TracingLogger::new(), &ctx, "orders", doc!({}), None)?;
//!
//! assert_eq!(cursor.count(), 0);
//! assert_eq!(client.store().calls("find"), 3);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Features
//!
//! - `async`: [`Executor::run_async`] and async cancellation, on tokio.
//! - `jitter`: randomized delays for [`JitterStrategy`].
//! - `proptest`: `Arbitrary` implementations for policies.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cancel;
pub mod client;
pub mod config;
pub mod logger;
pub mod retry;
pub mod store;
pub mod testing;

// Re-exports
pub use cancel::{CallContext, CancelReason, CancelToken};
pub use client::{Client, ClientError, OperationError};
pub use config::{ConfigError, RetryConfig};
pub use logger::{Level, Logger, NoopLogger, TracingLogger};
pub use retry::{
    run, Backoff, ErrorSentinel, Executor, JitterStrategy, PolicyError, RetryError,
    RetryExhausted, RetryPolicy, Sleeper, SkipList, ThreadSleeper,
};
pub use store::{
    AggregateOptions, Cursor, DeleteOptions, DeleteResult, Document, DocumentStore, FindOneOptions,
    FindOptions, InsertManyOptions, InsertManyResult, InsertOneOptions, InsertOneResult, Namespace,
    UpdateOptions, UpdateResult,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancel::{CallContext, CancelToken};
    pub use crate::client::{Client, ClientError};
    pub use crate::logger::{Logger, NoopLogger, TracingLogger};
    pub use crate::retry::{ErrorSentinel, Executor, RetryError, RetryPolicy, SkipList};
    pub use crate::store::{Document, DocumentStore, Namespace};
}
