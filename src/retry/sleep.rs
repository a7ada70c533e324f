//! Waiting between attempts.

use std::time::Duration;

use crate::cancel::{CallContext, CancelReason};

/// Blocks between attempts.
///
/// The executor hands every backoff delay to a `Sleeper` together with the
/// call's context. Implementations must return `Err` if the context ends the
/// wait early, and must not start another wait on their own.
pub trait Sleeper: Send + Sync {
    /// Wait for `delay`, or until `ctx` is cancelled or past its deadline.
    fn sleep(&self, delay: Duration, ctx: &CallContext) -> Result<(), CancelReason>;
}

/// Sleeps on the calling thread, waking early on cancellation or deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration, ctx: &CallContext) -> Result<(), CancelReason> {
        ctx.sleep(delay)
    }
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, delay: Duration, ctx: &CallContext) -> Result<(), CancelReason> {
        (**self).sleep(delay, ctx)
    }
}

impl<S: Sleeper + ?Sized> Sleeper for std::sync::Arc<S> {
    fn sleep(&self, delay: Duration, ctx: &CallContext) -> Result<(), CancelReason> {
        (**self).sleep(delay, ctx)
    }
}
