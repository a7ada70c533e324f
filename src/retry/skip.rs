//! Non-retryable error sentinels.
//!
//! A [`SkipList`] names the failures that must never be retried. Each
//! [`ErrorSentinel`] is tested against every link of a failure's
//! [`source`](std::error::Error::source) chain, so an error still matches
//! after callers wrap it with extra context.
//!
//! # Examples
//!
//! ```rust
//! use docstore_retry::{ErrorSentinel, SkipList};
//! use std::io;
//!
//! let skip = SkipList::new().with(ErrorSentinel::io_kind(io::ErrorKind::NotFound));
//!
//! let missing = io::Error::new(io::ErrorKind::NotFound, "no such document");
//! let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
//!
//! assert!(skip.matches(&missing).is_some());
//! assert!(skip.matches(&reset).is_none());
//! ```

use std::any::type_name;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

type Matcher = Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

/// Iterate over an error and everything it wraps, outermost first.
pub fn chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> + 'a {
    std::iter::successors(Some(err), |e: &&'a (dyn StdError + 'static)| (*e).source())
}

/// A named matcher for one class of error.
///
/// Sentinels compare by kind or by predicate, never by reference identity.
#[derive(Clone)]
pub struct ErrorSentinel {
    name: Cow<'static, str>,
    matcher: Matcher,
}

impl ErrorSentinel {
    /// Match any error of concrete type `T`.
    pub fn of_type<T: StdError + 'static>() -> Self {
        Self {
            name: Cow::Borrowed(type_name::<T>()),
            matcher: Arc::new(|err| err.is::<T>()),
        }
    }

    /// Match errors of type `T` for which `predicate` holds.
    ///
    /// ```rust
    /// use docstore_retry::ErrorSentinel;
    /// use docstore_retry::testing::StoreError;
    ///
    /// let sentinel = ErrorSentinel::matching("duplicate key", |e: &StoreError| {
    ///     matches!(e, StoreError::DuplicateKey(_))
    /// });
    /// assert!(sentinel.matches(&StoreError::DuplicateKey("1".into())));
    /// assert!(!sentinel.matches(&StoreError::NoDocuments));
    /// ```
    pub fn matching<T, F>(name: impl Into<Cow<'static, str>>, predicate: F) -> Self
    where
        T: StdError + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            matcher: Arc::new(move |err| err.downcast_ref::<T>().is_some_and(&predicate)),
        }
    }

    /// Match errors of type `T` equal to `value`.
    pub fn equal_to<T>(value: T) -> Self
    where
        T: StdError + PartialEq + Send + Sync + 'static,
    {
        let name = Cow::Owned(value.to_string());
        Self {
            name,
            matcher: Arc::new(move |err| err.downcast_ref::<T>() == Some(&value)),
        }
    }

    /// Match `std::io::Error`s of the given kind.
    pub fn io_kind(kind: std::io::ErrorKind) -> Self {
        Self::matching(format!("io::ErrorKind::{:?}", kind), move |e: &std::io::Error| {
            e.kind() == kind
        })
    }

    /// Human-readable name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Test `err` and every error it wraps.
    pub fn matches(&self, err: &(dyn StdError + 'static)) -> bool {
        chain(err).any(|link| (self.matcher)(link))
    }
}

impl fmt::Debug for ErrorSentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorSentinel").field(&self.name).finish()
    }
}

/// Ordered set of sentinels whose matches are never retried.
#[derive(Debug, Clone, Default)]
pub struct SkipList {
    sentinels: Vec<ErrorSentinel>,
}

impl SkipList {
    /// An empty skip-list: every failure is retryable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sentinel, builder style.
    pub fn with(mut self, sentinel: ErrorSentinel) -> Self {
        self.sentinels.push(sentinel);
        self
    }

    /// Append a sentinel.
    pub fn push(&mut self, sentinel: ErrorSentinel) {
        self.sentinels.push(sentinel);
    }

    /// Number of sentinels.
    pub fn len(&self) -> usize {
        self.sentinels.len()
    }

    /// Returns true when no sentinel is registered.
    pub fn is_empty(&self) -> bool {
        self.sentinels.is_empty()
    }

    /// Sentinels in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ErrorSentinel> {
        self.sentinels.iter()
    }

    /// The first sentinel matching `err` or anything it wraps.
    pub fn matches(&self, err: &(dyn StdError + 'static)) -> Option<&ErrorSentinel> {
        self.sentinels.iter().find(|sentinel| sentinel.matches(err))
    }
}

impl FromIterator<ErrorSentinel> for SkipList {
    fn from_iter<I: IntoIterator<Item = ErrorSentinel>>(iter: I) -> Self {
        Self {
            sentinels: iter.into_iter().collect(),
        }
    }
}

impl Extend<ErrorSentinel> for SkipList {
    fn extend<I: IntoIterator<Item = ErrorSentinel>>(&mut self, iter: I) {
        self.sentinels.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum DbError {
        NotFound,
        Timeout,
    }

    impl fmt::Display for DbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                DbError::NotFound => write!(f, "not found"),
                DbError::Timeout => write!(f, "timeout"),
            }
        }
    }

    impl StdError for DbError {}

    #[derive(Debug)]
    struct Wrapped {
        op: &'static str,
        inner: DbError,
    }

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}: {}", self.op, self.inner)
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.inner)
        }
    }

    #[test]
    fn test_equal_to_matches_only_that_value() {
        let sentinel = ErrorSentinel::equal_to(DbError::NotFound);
        assert!(sentinel.matches(&DbError::NotFound));
        assert!(!sentinel.matches(&DbError::Timeout));
        assert_eq!(sentinel.name(), "not found");
    }

    #[test]
    fn test_sentinel_matches_through_wrapping() {
        let sentinel = ErrorSentinel::equal_to(DbError::NotFound);
        let wrapped = Wrapped {
            op: "find_one",
            inner: DbError::NotFound,
        };
        assert!(sentinel.matches(&wrapped));
    }

    #[test]
    fn test_of_type_matches_any_value_of_type() {
        let sentinel = ErrorSentinel::of_type::<DbError>();
        assert!(sentinel.matches(&DbError::Timeout));
        assert!(sentinel.matches(&Wrapped {
            op: "insert_one",
            inner: DbError::Timeout,
        }));
        assert!(!sentinel.matches(&std::fmt::Error));
    }

    #[test]
    fn test_chain_walks_outermost_first() {
        let wrapped = Wrapped {
            op: "update_one",
            inner: DbError::Timeout,
        };
        let links: Vec<String> = chain(&wrapped).map(|e| e.to_string()).collect();
        assert_eq!(links, vec!["update_one: timeout", "timeout"]);
    }

    #[test]
    fn test_skip_list_returns_first_match() {
        let skip: SkipList = vec![
            ErrorSentinel::matching("timeouts", |e: &DbError| *e == DbError::Timeout),
            ErrorSentinel::of_type::<DbError>(),
        ]
        .into_iter()
        .collect();

        let hit = skip.matches(&DbError::Timeout).map(ErrorSentinel::name);
        assert_eq!(hit, Some("timeouts"));
        assert_eq!(skip.len(), 2);
    }

    #[test]
    fn test_empty_skip_list_matches_nothing() {
        let skip = SkipList::new();
        assert!(skip.is_empty());
        assert!(skip.matches(&DbError::NotFound).is_none());
    }

    #[test]
    fn test_extend_and_push() {
        let mut skip = SkipList::new();
        skip.push(ErrorSentinel::equal_to(DbError::NotFound));
        skip.extend([ErrorSentinel::io_kind(std::io::ErrorKind::TimedOut)]);
        assert_eq!(skip.iter().count(), 2);

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(
            skip.matches(&timed_out).map(ErrorSentinel::name),
            Some("io::ErrorKind::TimedOut")
        );
    }
}
