//! The retry loop.

use std::error::Error as StdError;
use std::fmt;
use std::time::{Duration, Instant};

use super::error::{RetryError, RetryExhausted};
use super::policy::RetryPolicy;
use super::skip::SkipList;
use super::sleep::{Sleeper, ThreadSleeper};
use crate::cancel::CallContext;
use crate::logger::Logger;

/// Message logged, at warn level, for every failure that will be retried.
pub const RETRY_MESSAGE: &str = "retrying error";

/// Run `operation` under `policy`, blocking the calling thread between
/// attempts.
///
/// This is the plain entry point: no deadline, no cancellation, real sleeps.
/// Use [`Executor`] to supply a [`CallContext`] or a custom [`Sleeper`].
///
/// # Errors
///
/// - [`RetryError::Aborted`] with the untouched error when it matches
///   `skip_list` (the operation ran once).
/// - [`RetryError::Exhausted`] wrapping the last error after
///   `policy.max_attempts()` failures.
/// - [`RetryError::InvalidPolicy`] without running the operation when the
///   policy does not validate.
///
/// # Examples
///
/// ```rust
/// use docstore_retry::{NoopLogger, RetryPolicy, SkipList};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::constant(Duration::from_millis(1)).with_max_attempts(3);
/// let mut calls = 0;
/// let result = docstore_retry::run(
///     &NoopLogger,
///     &policy,
///     || {
///         calls += 1;
///         if calls < 3 { Err(std::fmt::Error) } else { Ok("ok") }
///     },
///     &SkipList::new(),
/// );
///
/// assert_eq!(result, Ok("ok"));
/// assert_eq!(calls, 3);
/// ```
pub fn run<T, E, F>(
    logger: &dyn Logger,
    policy: &RetryPolicy,
    operation: F,
    skip_list: &SkipList,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Result<T, E>,
    E: StdError + 'static,
{
    Executor::new(logger, policy)
        .skip_list(skip_list)
        .run(operation)
}

/// A configured retry loop.
///
/// Borrows its logger, policy, skip-list and sleeper; owns a clone of the
/// call context. Build one per call and discard it.
pub struct Executor<'a> {
    logger: &'a dyn Logger,
    policy: &'a RetryPolicy,
    skip_list: Option<&'a SkipList>,
    sleeper: &'a dyn Sleeper,
    ctx: CallContext,
}

impl<'a> Executor<'a> {
    /// An executor with an empty skip-list, a background context and
    /// [`ThreadSleeper`].
    pub fn new(logger: &'a dyn Logger, policy: &'a RetryPolicy) -> Self {
        Self {
            logger,
            policy,
            skip_list: None,
            sleeper: &ThreadSleeper,
            ctx: CallContext::background(),
        }
    }

    /// Errors matching `skip_list` are returned without retrying.
    pub fn skip_list(mut self, skip_list: &'a SkipList) -> Self {
        self.skip_list = Some(skip_list);
        self
    }

    /// Wait between attempts with `sleeper`.
    pub fn sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Bound every wait by `ctx`.
    pub fn context(mut self, ctx: CallContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Run `operation` until it succeeds, fails with a skip-listed error,
    /// exhausts the policy, or a wait is interrupted.
    pub fn run<T, E, F>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: StdError + 'static,
    {
        self.policy.validate().map_err(RetryError::InvalidPolicy)?;

        let start = Instant::now();
        let mut attempt = 0u32;
        loop {
            let error = match operation() {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            attempt += 1;

            let (error, delay) = self.after_failure(error, attempt, start)?;
            if let Err(reason) = self.sleeper.sleep(delay, &self.ctx) {
                return Err(RetryError::Cancelled {
                    reason,
                    attempts: attempt,
                    last_error: error,
                });
            }
        }
    }

    /// Async counterpart of [`run`](Self::run).
    ///
    /// Awaits a fresh future per attempt and waits with `tokio::time`,
    /// interruptible by the executor's context. The configured [`Sleeper`] is
    /// not used.
    ///
    /// ```rust
    /// use docstore_retry::{Executor, NoopLogger, RetryPolicy};
    /// use std::time::Duration;
    ///
    /// # tokio_test::block_on(async {
    /// let policy = RetryPolicy::constant(Duration::from_millis(1));
    /// let result = Executor::new(&NoopLogger, &policy)
    ///     .run_async(|| async { Ok::<_, std::fmt::Error>(7) })
    ///     .await;
    /// assert_eq!(result, Ok(7));
    /// # });
    /// ```
    #[cfg(feature = "async")]
    pub async fn run_async<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: StdError + 'static,
    {
        self.policy.validate().map_err(RetryError::InvalidPolicy)?;

        let start = Instant::now();
        let mut attempt = 0u32;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            attempt += 1;

            let (error, delay) = self.after_failure(error, attempt, start)?;
            if let Err(reason) = self.ctx.sleep_async(delay).await {
                return Err(RetryError::Cancelled {
                    reason,
                    attempts: attempt,
                    last_error: error,
                });
            }
        }
    }

    // Decide what follows the failed attempt number `attempt` (1-based):
    // either the loop ends, or the retry is logged and the caller waits
    // the returned delay.
    fn after_failure<E>(
        &self,
        error: E,
        attempt: u32,
        start: Instant,
    ) -> Result<(E, Duration), RetryError<E>>
    where
        E: StdError + 'static,
    {
        if self.skip_list.is_some_and(|skip| skip.matches(&error).is_some()) {
            return Err(RetryError::Aborted(error));
        }
        if attempt >= self.policy.max_attempts() {
            return Err(RetryError::Exhausted(RetryExhausted::new(
                error,
                attempt,
                start.elapsed(),
            )));
        }

        let delay = self.policy.delay_for_attempt(attempt - 1);
        self.logger.warn(
            RETRY_MESSAGE,
            &[
                ("error", &error),
                ("attempt", &attempt),
                ("max_attempts", &self.policy.max_attempts()),
                ("delay", &DisplayDuration(delay)),
            ],
        );
        Ok((error, delay))
    }
}

impl fmt::Debug for Executor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("policy", self.policy)
            .field("skip_list", &self.skip_list)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

struct DisplayDuration(Duration);

impl fmt::Display for DisplayDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
