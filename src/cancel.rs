//! Cancellation and deadlines for a single call.
//!
//! A [`CallContext`] travels with every facade call. It is handed to the
//! document store, and the retry executor uses the same context to bound the
//! wait between attempts, so a cancelled or expired call never sleeps its way
//! into another attempt.
//!
//! # Examples
//!
//! ```rust
//! use docstore_retry::{CallContext, CancelReason};
//! use std::time::Duration;
//!
//! let ctx = CallContext::background();
//! assert!(ctx.err().is_none());
//!
//! ctx.token().cancel();
//! assert_eq!(ctx.err(), Some(CancelReason::Cancelled));
//! assert_eq!(ctx.sleep(Duration::from_secs(60)), Err(CancelReason::Cancelled));
//! ```

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Why a call stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The call's [`CancelToken`] was triggered.
    Cancelled,
    /// The call's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => write!(f, "call cancelled"),
            CancelReason::DeadlineExceeded => write!(f, "call deadline exceeded"),
        }
    }
}

impl std::error::Error for CancelReason {}

/// A shareable, one-shot cancellation flag.
///
/// Clones observe the same flag. Cancelling wakes every thread blocked in
/// [`CallContext::sleep`] and, with the `async` feature, every task awaiting
/// [`CancelToken::cancelled`].
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: Mutex<bool>,
    wake: Condvar,
    #[cfg(feature = "async")]
    notify: tokio::sync::Notify,
}

impl CancelToken {
    /// Create a token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger cancellation. Idempotent.
    pub fn cancel(&self) {
        let mut cancelled = self.lock();
        *cancelled = true;
        drop(cancelled);
        self.inner.wake.notify_all();
        #[cfg(feature = "async")]
        self.inner.notify.notify_waiters();
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.lock()
    }

    /// Block for at most `timeout`, returning early if the token is cancelled.
    ///
    /// Returns true if the wait ended because of cancellation.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let until = Instant::now().checked_add(timeout);
        let mut cancelled = self.lock();
        while !*cancelled {
            match until {
                Some(until) => {
                    let now = Instant::now();
                    if now >= until {
                        return false;
                    }
                    let (guard, _) = self
                        .inner
                        .wake
                        .wait_timeout(cancelled, until - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    cancelled = guard;
                }
                None => {
                    cancelled = self
                        .inner
                        .wake
                        .wait(cancelled)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
        }
        true
    }

    /// Resolve once the token is cancelled.
    #[cfg(feature = "async")]
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            futures::pin_mut!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancellation token plus optional deadline for one call.
///
/// Cloning is cheap and clones share the token.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    token: CancelToken,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            token: CancelToken::new(),
        }
    }

    /// Replace the deadline, keeping the token.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Replace the token, keeping the deadline.
    pub fn with_token(mut self, token: CancelToken) -> Self {
        self.token = token;
        self
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cancellation token.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Time left before the deadline. `None` means unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Why this context is done, or `None` while it is still live.
    ///
    /// Cancellation takes precedence over an expired deadline.
    pub fn err(&self) -> Option<CancelReason> {
        if self.token.is_cancelled() {
            Some(CancelReason::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(CancelReason::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Block the calling thread for `delay`, or until the context is done.
    ///
    /// Returns `Ok(())` only if the full delay elapsed while the context was
    /// live. If the deadline falls inside the delay, this waits until the
    /// deadline and reports [`CancelReason::DeadlineExceeded`].
    pub fn sleep(&self, delay: Duration) -> Result<(), CancelReason> {
        if let Some(reason) = self.err() {
            return Err(reason);
        }
        let (wait, cut_short) = self.bounded(delay);
        if self.token.wait_timeout(wait) {
            return Err(CancelReason::Cancelled);
        }
        if cut_short {
            Err(CancelReason::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Async counterpart of [`sleep`](Self::sleep), backed by `tokio::time`.
    #[cfg(feature = "async")]
    pub async fn sleep_async(&self, delay: Duration) -> Result<(), CancelReason> {
        use futures::future::{select, Either};

        if let Some(reason) = self.err() {
            return Err(reason);
        }
        let (wait, cut_short) = self.bounded(delay);
        let timer = tokio::time::sleep(wait);
        let cancelled = self.token.cancelled();
        futures::pin_mut!(timer, cancelled);
        match select(timer, cancelled).await {
            Either::Left(_) if cut_short => Err(CancelReason::DeadlineExceeded),
            Either::Left(_) => Ok(()),
            Either::Right(_) => Err(CancelReason::Cancelled),
        }
    }

    // Clamp a delay to the deadline; the flag says whether it was clamped.
    fn bounded(&self, delay: Duration) -> (Duration, bool) {
        match self.remaining() {
            Some(left) if left < delay => (left, true),
            _ => (delay, false),
        }
    }
}
