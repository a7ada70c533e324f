//! Store errors annotated with the call that produced them.

use std::error::Error as StdError;
use std::fmt;

use crate::retry::RetryError;
use crate::store::Namespace;

/// Error type returned by every [`Client`](super::Client) method.
///
/// Every outcome that observed a store error wraps it in an
/// [`OperationError`], including a skip-listed one:
/// `RetryError::Aborted(OperationError { .. })`. Use
/// [`store_error`](RetryError::store_error) or
/// [`into_store_error`](RetryError::into_store_error) to get the store's own
/// error back.
pub type ClientError<E> = RetryError<OperationError<E>>;

impl<E> RetryError<OperationError<E>> {
    /// The store error behind this outcome, if one was observed.
    pub fn store_error(&self) -> Option<&E> {
        self.cause().map(OperationError::inner)
    }

    /// Consume and return the store error behind this outcome.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use docstore_retry::{ClientError, Namespace, OperationError, RetryError};
    /// use docstore_retry::testing::StoreError;
    ///
    /// let err: ClientError<StoreError> = RetryError::Aborted(OperationError::new(
    ///     "find_one",
    ///     Namespace::new("app", "users"),
    ///     StoreError::NoDocuments,
    /// ));
    ///
    /// assert_eq!(err.into_store_error(), Some(StoreError::NoDocuments));
    /// ```
    pub fn into_store_error(self) -> Option<E> {
        self.into_cause().map(OperationError::into_inner)
    }
}

/// A store error plus the operation and namespace it came from.
///
/// The wrapped error stays reachable through [`source`](StdError::source),
/// so skip-list sentinels written against the store's error type still match.
///
/// # Examples
///
/// ```rust
/// use docstore_retry::{Namespace, OperationError};
/// use docstore_retry::testing::StoreError;
///
/// let err = OperationError::new("find_one", Namespace::new("app", "users"), StoreError::NoDocuments);
///
/// assert_eq!(err.operation(), "find_one");
/// assert_eq!(err.to_string(), "find_one on app.users: no documents in result");
/// assert_eq!(err.into_inner(), StoreError::NoDocuments);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationError<E> {
    operation: &'static str,
    namespace: Namespace,
    error: E,
}

impl<E> OperationError<E> {
    /// Annotate `error` with the operation and namespace.
    pub fn new(operation: &'static str, namespace: Namespace, error: E) -> Self {
        Self {
            operation,
            namespace,
            error,
        }
    }

    /// Name of the client operation, e.g. `"update_many"`.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Namespace the operation targeted.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The store's error.
    pub fn inner(&self) -> &E {
        &self.error
    }

    /// Consume and return the store's error.
    pub fn into_inner(self) -> E {
        self.error
    }
}

impl<E: fmt::Display> fmt::Display for OperationError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}: {}", self.operation, self.namespace, self.error)
    }
}

impl<E: StdError + 'static> StdError for OperationError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.error)
    }
}
