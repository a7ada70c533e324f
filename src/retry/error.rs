//! Error types for retry operations.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use crate::cancel::CancelReason;

/// A retry policy that cannot be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    /// `max_attempts` was zero; the operation could never run.
    ZeroAttempts,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::ZeroAttempts => write!(f, "retry policy must allow at least one attempt"),
        }
    }
}

impl StdError for PolicyError {}

/// Error returned when all retry attempts are exhausted.
///
/// Wraps the error from the final attempt, which stays reachable through
/// [`source`](StdError::source) and [`final_error`](Self::final_error).
///
/// # Examples
///
/// ```rust
/// use docstore_retry::{NoopLogger, RetryError, RetryPolicy, SkipList};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::constant(Duration::ZERO).with_max_attempts(2);
/// let result = docstore_retry::run(
///     &NoopLogger,
///     &policy,
///     || Err::<(), _>(std::fmt::Error),
///     &SkipList::new(),
/// );
///
/// match result {
///     Err(RetryError::Exhausted(exhausted)) => assert_eq!(exhausted.attempts, 2),
///     other => panic!("expected exhaustion, got {:?}", other),
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    /// The error from the final attempt.
    pub final_error: E,
    /// Total number of attempts made.
    pub attempts: u32,
    /// Time from the first attempt to giving up.
    pub total_duration: Duration,
}

impl<E> RetryExhausted<E> {
    /// Create a new RetryExhausted error.
    pub fn new(final_error: E, attempts: u32, total_duration: Duration) -> Self {
        Self {
            final_error,
            attempts,
            total_duration,
        }
    }

    /// Extract the final error, discarding metadata.
    pub fn into_error(self) -> E {
        self.final_error
    }

    /// Get a reference to the final error.
    pub fn error(&self) -> &E {
        &self.final_error
    }
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max retries exceeded after {} attempts: {}",
            self.attempts, self.final_error
        )
    }
}

impl<E: StdError + 'static> StdError for RetryExhausted<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.final_error)
    }
}

/// Outcome of a failed execution.
///
/// Callers see one of three shapes for an operation error: the untouched
/// skip-listed error ([`Aborted`](Self::Aborted)), a wrapped exhaustion
/// ([`Exhausted`](Self::Exhausted)), or an interrupted backoff
/// ([`Cancelled`](Self::Cancelled)). Use [`cause`](Self::cause) to reach the
/// operation's own error regardless of shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// The error matched the skip-list and was returned without retrying.
    ///
    /// `Display` is transparent to the inner error; `source` is the inner
    /// error itself, so the sentinel that stopped the loop still matches
    /// the returned error.
    Aborted(E),
    /// Every attempt failed.
    Exhausted(RetryExhausted<E>),
    /// The wait before the next attempt was interrupted.
    Cancelled {
        /// Why the wait ended.
        reason: CancelReason,
        /// Attempts made before the interruption.
        attempts: u32,
        /// The error that triggered the interrupted wait.
        last_error: E,
    },
    /// The policy was rejected before the operation ran.
    InvalidPolicy(PolicyError),
}

impl<E> RetryError<E> {
    /// The operation's own error, if one was observed.
    pub fn cause(&self) -> Option<&E> {
        match self {
            RetryError::Aborted(e) => Some(e),
            RetryError::Exhausted(exhausted) => Some(&exhausted.final_error),
            RetryError::Cancelled { last_error, .. } => Some(last_error),
            RetryError::InvalidPolicy(_) => None,
        }
    }

    /// Consume and return the operation's own error, if one was observed.
    pub fn into_cause(self) -> Option<E> {
        match self {
            RetryError::Aborted(e) => Some(e),
            RetryError::Exhausted(exhausted) => Some(exhausted.final_error),
            RetryError::Cancelled { last_error, .. } => Some(last_error),
            RetryError::InvalidPolicy(_) => None,
        }
    }

    /// Number of times the operation ran.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Aborted(_) => 1,
            RetryError::Exhausted(exhausted) => exhausted.attempts,
            RetryError::Cancelled { attempts, .. } => *attempts,
            RetryError::InvalidPolicy(_) => 0,
        }
    }

    /// Returns true for a skip-listed error.
    pub fn is_aborted(&self) -> bool {
        matches!(self, RetryError::Aborted(_))
    }

    /// Returns true when every attempt failed.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted(_))
    }

    /// Returns true when a backoff wait was interrupted.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    /// Map the operation error type, keeping the outcome's shape.
    pub fn map_cause<F, U>(self, f: F) -> RetryError<U>
    where
        F: FnOnce(E) -> U,
    {
        match self {
            RetryError::Aborted(e) => RetryError::Aborted(f(e)),
            RetryError::Exhausted(RetryExhausted {
                final_error,
                attempts,
                total_duration,
            }) => RetryError::Exhausted(RetryExhausted::new(f(final_error), attempts, total_duration)),
            RetryError::Cancelled {
                reason,
                attempts,
                last_error,
            } => RetryError::Cancelled {
                reason,
                attempts,
                last_error: f(last_error),
            },
            RetryError::InvalidPolicy(e) => RetryError::InvalidPolicy(e),
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Aborted(e) => write!(f, "{}", e),
            RetryError::Exhausted(exhausted) => write!(f, "{}", exhausted),
            RetryError::Cancelled {
                reason,
                attempts,
                last_error,
            } => write!(
                f,
                "{} after {} attempts; last error: {}",
                reason, attempts, last_error
            ),
            RetryError::InvalidPolicy(e) => write!(f, "invalid retry policy: {}", e),
        }
    }
}

impl<E: StdError + 'static> StdError for RetryError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            RetryError::Aborted(e) => Some(e),
            RetryError::Exhausted(exhausted) => Some(&exhausted.final_error),
            RetryError::Cancelled { last_error, .. } => Some(last_error),
            RetryError::InvalidPolicy(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;
    use std::io;

    fn io_error(msg: &str) -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionReset, msg.to_string())
    }

    #[test]
    fn test_retry_exhausted_display() {
        let err = RetryExhausted::new("connection failed", 3, Duration::from_millis(500));
        let display = format!("{}", err);
        assert!(display.contains("max retries exceeded"));
        assert!(display.contains("3 attempts"));
        assert!(display.contains("connection failed"));
    }

    #[test]
    fn test_retry_exhausted_into_error() {
        let err = RetryExhausted::new("test error", 5, Duration::from_secs(1));
        assert_eq!(err.error(), &"test error");
        assert_eq!(err.into_error(), "test error");
    }

    #[test]
    fn test_exhausted_source_is_final_error() {
        let err: RetryError<io::Error> =
            RetryError::Exhausted(RetryExhausted::new(io_error("reset"), 2, Duration::ZERO));
        let source = err.source().expect("exhaustion wraps its cause");
        assert_eq!(source.to_string(), "reset");
        assert!(source.downcast_ref::<io::Error>().is_some());
    }

    #[test]
    fn test_aborted_display_is_transparent() {
        let err: RetryError<io::Error> = RetryError::Aborted(io_error("not found"));
        assert_eq!(err.to_string(), "not found");
        let source = err.source().expect("aborted exposes the skipped error");
        assert_eq!(source.to_string(), "not found");
        assert!(err.is_aborted());
        assert_eq!(err.attempts(), 1);
    }

    #[test]
    fn test_cancelled_display_and_cause() {
        let err = RetryError::Cancelled {
            reason: CancelReason::DeadlineExceeded,
            attempts: 2,
            last_error: "timeout",
        };
        assert_eq!(
            err.to_string(),
            "call deadline exceeded after 2 attempts; last error: timeout"
        );
        assert_eq!(err.cause(), Some(&"timeout"));
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_invalid_policy_has_no_cause() {
        let err: RetryError<&str> = RetryError::InvalidPolicy(PolicyError::ZeroAttempts);
        assert_eq!(err.cause(), None);
        assert_eq!(err.attempts(), 0);
        assert!(err.to_string().contains("at least one attempt"));
        assert_eq!(err.into_cause(), None);
    }

    #[test]
    fn test_map_cause_keeps_shape() {
        let err = RetryError::Exhausted(RetryExhausted::new(4, 4, Duration::from_millis(3)));
        let mapped = err.map_cause(|n: i32| n.to_string());
        match mapped {
            RetryError::Exhausted(exhausted) => {
                assert_eq!(exhausted.final_error, "4");
                assert_eq!(exhausted.attempts, 4);
                assert_eq!(exhausted.total_duration, Duration::from_millis(3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
