//! Retry with backoff around fallible operations.
//!
//! The engine has two inputs besides the operation itself:
//!
//! - **[`RetryPolicy`]**: how many attempts, and how long to wait after each
//!   failed one. Policies are plain data and never change during a run.
//! - **[`SkipList`]**: which failures must never be retried. Matching walks
//!   the error's `source()` chain, so wrapped errors still match.
//!
//! # Quick Start
//!
//! ```rust
//! use docstore_retry::{ErrorSentinel, NoopLogger, RetryError, RetryPolicy, SkipList};
//! use std::io;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::exponential(Duration::from_millis(1)).with_max_attempts(4);
//! let skip = SkipList::new().with(ErrorSentinel::io_kind(io::ErrorKind::NotFound));
//!
//! let result: Result<(), _> = docstore_retry::run(
//!     &NoopLogger,
//!     &policy,
//!     || Err(io::Error::new(io::ErrorKind::NotFound, "missing")),
//!     &skip,
//! );
//!
//! // Skip-listed errors come back untouched after a single attempt.
//! assert!(matches!(result, Err(RetryError::Aborted(ref e)) if e.kind() == io::ErrorKind::NotFound));
//! ```
//!
//! # Outcomes
//!
//! - `Ok(value)`: some attempt succeeded; later attempts never ran.
//! - [`RetryError::Aborted`]: a skip-listed failure, returned as-is.
//! - [`RetryError::Exhausted`]: every attempt failed; wraps the last error.
//! - [`RetryError::Cancelled`]: the call's context ended a backoff wait.
//! - [`RetryError::InvalidPolicy`]: the policy allows zero attempts.
//!
//! Every failure that leads to another attempt is logged once at warn level.
//! Skip-listed and final failures are not logged; the caller owns them.

mod error;
mod executor;
mod policy;
mod skip;
mod sleep;

pub use error::{PolicyError, RetryError, RetryExhausted};
pub use executor::{run, Executor, RETRY_MESSAGE};
pub use policy::{Backoff, BackoffFn, JitterStrategy, RetryPolicy};
pub use skip::{chain, ErrorSentinel, SkipList};
pub use sleep::{Sleeper, ThreadSleeper};
