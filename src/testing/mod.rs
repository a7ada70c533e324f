//! Testing utilities for code built on the retry client.
//!
//! This module provides doubles for every collaborator the client talks to,
//! assertion macros for retry outcomes, and property-based testing support.
//!
//! - [`MemoryStore`]: an in-process [`DocumentStore`](crate::DocumentStore)
//!   with scripted failures and per-operation call counts.
//! - [`RecordingLogger`]: keeps every event for later inspection.
//! - [`TrackingSleeper`] and [`InstantSleeper`]: wait without waiting.
//!
//! # Examples
//!
//! ```rust
//! use docstore_retry::testing::{RecordingLogger, TrackingSleeper};
//! use docstore_retry::{assert_exhausted, Executor, RetryPolicy};
//! use std::time::Duration;
//!
//! let logger = RecordingLogger::new();
//! let sleeper = TrackingSleeper::new();
//! let policy = RetryPolicy::linear(Duration::from_millis(10)).with_max_attempts(3);
//!
//! let result: Result<(), _> = Executor::new(&logger, &policy)
//!     .sleeper(&sleeper)
//!     .run(|| Err(std::fmt::Error));
//!
//! assert_exhausted!(result, 3);
//! assert_eq!(sleeper.calls(), vec![Duration::from_millis(10), Duration::from_millis(20)]);
//! assert_eq!(logger.warnings().len(), 2);
//! ```

mod memory;

pub use memory::{MemoryStore, StoreError};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::cancel::{CallContext, CancelReason};
use crate::logger::{Field, Level, Logger};
use crate::retry::Sleeper;

/// One event captured by [`RecordingLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Severity.
    pub level: Level,
    /// Message text.
    pub message: String,
    /// Context fields followed by the event's own fields, rendered.
    pub fields: Vec<(String, String)>,
}

impl LogRecord {
    /// Rendered value of the first field named `key`.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A [`Logger`] that stores every event in memory.
///
/// Clones, and loggers derived with [`with`](Logger::with), append to the
/// same record list.
#[derive(Debug, Clone, Default)]
pub struct RecordingLogger {
    records: Arc<Mutex<Vec<LogRecord>>>,
    context: Vec<(String, String)>,
}

impl RecordingLogger {
    /// A logger with no records and no context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event so far, oldest first.
    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().clone()
    }

    /// Warn-level events only.
    pub fn warnings(&self) -> Vec<LogRecord> {
        self.lock()
            .iter()
            .filter(|r| r.level == Level::Warn)
            .cloned()
            .collect()
    }

    /// Forget every recorded event.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn render<'a>(fields: &'a [Field<'a>]) -> impl Iterator<Item = (String, String)> + 'a {
    fields.iter().map(|(k, v)| (k.to_string(), v.to_string()))
}

impl Logger for RecordingLogger {
    fn log(&self, level: Level, msg: &str, fields: &[Field<'_>]) {
        let record = LogRecord {
            level,
            message: msg.to_string(),
            fields: self.context.iter().cloned().chain(render(fields)).collect(),
        };
        self.lock().push(record);
    }

    fn with(&self, fields: &[Field<'_>]) -> Box<dyn Logger> {
        let mut derived = self.clone();
        derived.context.extend(render(fields));
        Box::new(derived)
    }
}

/// A [`Sleeper`] that records each requested delay and returns at once.
///
/// A context that is already cancelled or past its deadline still ends the
/// wait with an error, as a real sleeper would.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    /// A sleeper with no recorded calls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn calls(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Sum of every requested delay.
    pub fn total(&self) -> Duration {
        self.calls().into_iter().sum()
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, delay: Duration, ctx: &CallContext) -> Result<(), CancelReason> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(delay);
        match ctx.err() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}

/// A [`Sleeper`] that never waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _delay: Duration, ctx: &CallContext) -> Result<(), CancelReason> {
        match ctx.err() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}

/// Assert that a retry result is [`RetryError::Aborted`](crate::RetryError::Aborted).
///
/// # Example
///
/// ```rust
/// use docstore_retry::{assert_aborted, RetryError};
///
/// let result: Result<(), RetryError<std::fmt::Error>> = Err(RetryError::Aborted(std::fmt::Error));
/// assert_aborted!(result);
/// ```
#[macro_export]
macro_rules! assert_aborted {
    ($result:expr) => {
        match $result {
            Err($crate::RetryError::Aborted(_)) => {}
            other => panic!("Expected Aborted, got {:?}", other),
        }
    };
}

/// Assert that a retry result is [`RetryError::Exhausted`](crate::RetryError::Exhausted),
/// optionally after exactly `attempts` attempts.
///
/// # Example
///
/// ```rust
/// use docstore_retry::{assert_exhausted, NoopLogger, RetryPolicy, SkipList};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::constant(Duration::ZERO).with_max_attempts(2);
/// let result: Result<(), _> =
///     docstore_retry::run(&NoopLogger, &policy, || Err(std::fmt::Error), &SkipList::new());
/// assert_exhausted!(result, 2);
/// ```
#[macro_export]
macro_rules! assert_exhausted {
    ($result:expr) => {
        match $result {
            Err($crate::RetryError::Exhausted(_)) => {}
            other => panic!("Expected Exhausted, got {:?}", other),
        }
    };
    ($result:expr, $attempts:expr) => {
        match $result {
            Err($crate::RetryError::Exhausted(exhausted)) => {
                assert_eq!(exhausted.attempts, $attempts);
            }
            other => panic!("Expected Exhausted after {} attempts, got {:?}", $attempts, other),
        }
    };
}

#[cfg(feature = "proptest")]
use crate::retry::{Backoff, RetryPolicy};
#[cfg(feature = "proptest")]
use proptest::prelude::*;

#[cfg(feature = "proptest")]
impl Arbitrary for Backoff {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        let base = (0u64..1_000).prop_map(Duration::from_millis);
        prop_oneof![
            base.clone().prop_map(Backoff::Constant),
            base.clone().prop_map(|base| Backoff::Linear { base }),
            base.clone().prop_map(|base| Backoff::Exponential { base }),
            base.prop_map(|base| Backoff::Fibonacci { base }),
        ]
        .boxed()
    }
}

#[cfg(feature = "proptest")]
impl Arbitrary for RetryPolicy {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            1u32..=10,
            any::<Backoff>(),
            proptest::option::of((0u64..5_000).prop_map(Duration::from_millis)),
        )
            .prop_filter_map("valid policy", |(attempts, backoff, cap)| {
                let policy = RetryPolicy::new(attempts, backoff).ok()?;
                Some(match cap {
                    Some(cap) => policy.with_max_delay(cap),
                    None => policy,
                })
            })
            .boxed()
    }
}
