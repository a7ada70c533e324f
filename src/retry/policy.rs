//! Retry policy types and configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::error::PolicyError;

/// Backoff schedule supplied as a plain function of the attempt index.
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// A retry policy: how many times to run an operation and how long to wait
/// between runs.
///
/// Policies are pure data. The executor reads them and never mutates them,
/// so one policy can back any number of concurrent executions.
///
/// # Attempts
///
/// `max_attempts` counts every invocation of the operation, including the
/// first. A policy with `max_attempts(3)` runs the operation at most three
/// times and sleeps at most twice. A policy with zero attempts is rejected by
/// [`validate`](Self::validate) and by every constructor that can fail.
///
/// # Examples
///
/// ```rust
/// use docstore_retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(Duration::from_millis(100))
///     .with_max_attempts(5)
///     .with_max_delay(Duration::from_secs(1));
///
/// assert_eq!(policy.max_attempts(), 5);
/// assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
/// assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(1)); // capped
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    max_delay: Option<Duration>,
    jitter: JitterStrategy,
}

/// The backoff schedule: attempt index (0-based) to wait duration.
#[derive(Clone)]
pub enum Backoff {
    /// Fixed delay between attempts.
    Constant(Duration),
    /// Delay increases linearly: base * (attempt + 1).
    Linear {
        /// Base delay duration.
        base: Duration,
    },
    /// Delay doubles: base * 2^attempt.
    Exponential {
        /// Base delay duration.
        base: Duration,
    },
    /// Delay follows the Fibonacci sequence: base * fib(attempt + 1).
    Fibonacci {
        /// Base delay duration.
        base: Duration,
    },
    /// Caller-supplied schedule.
    Custom(BackoffFn),
}

impl Backoff {
    /// Wrap a function as a backoff schedule.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Backoff::Custom(Arc::new(f))
    }

    /// Raw delay for a 0-based attempt index, before capping and jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Constant(d) => *d,
            Backoff::Linear { base } => base.saturating_mul(attempt.saturating_add(1)),
            Backoff::Exponential { base } => base.saturating_mul(2u32.saturating_pow(attempt)),
            Backoff::Fibonacci { base } => {
                base.saturating_mul(fibonacci(attempt.saturating_add(1)))
            }
            Backoff::Custom(f) => f(attempt),
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::Constant(d) => f.debug_tuple("Constant").field(d).finish(),
            Backoff::Linear { base } => f.debug_struct("Linear").field("base", base).finish(),
            Backoff::Exponential { base } => {
                f.debug_struct("Exponential").field("base", base).finish()
            }
            Backoff::Fibonacci { base } => {
                f.debug_struct("Fibonacci").field("base", base).finish()
            }
            Backoff::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

impl PartialEq for Backoff {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Backoff::Constant(a), Backoff::Constant(b)) => a == b,
            (Backoff::Linear { base: a }, Backoff::Linear { base: b }) => a == b,
            (Backoff::Exponential { base: a }, Backoff::Exponential { base: b }) => a == b,
            (Backoff::Fibonacci { base: a }, Backoff::Fibonacci { base: b }) => a == b,
            (Backoff::Custom(a), Backoff::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Strategy for adding randomness to delays.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum JitterStrategy {
    /// No jitter applied.
    #[default]
    None,
    /// Add ±percentage randomness to delay.
    Proportional(f64),
    /// Random delay between 0 and calculated delay.
    Full,
}

impl RetryPolicy {
    /// Attempt budget used by the named-schedule constructors.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Create a policy from an explicit attempt budget and schedule.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::ZeroAttempts`] when `max_attempts` is zero.
    ///
    /// ```rust
    /// use docstore_retry::{Backoff, PolicyError, RetryPolicy};
    /// use std::time::Duration;
    ///
    /// let backoff = Backoff::Constant(Duration::from_millis(10));
    /// assert!(RetryPolicy::new(3, backoff.clone()).is_ok());
    /// assert_eq!(RetryPolicy::new(0, backoff), Err(PolicyError::ZeroAttempts));
    /// ```
    pub fn new(max_attempts: u32, backoff: Backoff) -> Result<Self, PolicyError> {
        let policy = Self {
            max_attempts,
            backoff,
            max_delay: None,
            jitter: JitterStrategy::None,
        };
        policy.validate()?;
        Ok(policy)
    }

    fn with_backoff(backoff: Backoff) -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            backoff,
            max_delay: None,
            jitter: JitterStrategy::None,
        }
    }

    /// Create a policy with constant delay between attempts.
    ///
    /// ```rust
    /// use docstore_retry::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::constant(Duration::from_millis(500));
    /// assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
    /// assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(500));
    /// ```
    pub fn constant(delay: Duration) -> Self {
        Self::with_backoff(Backoff::Constant(delay))
    }

    /// Create a policy with linearly increasing delay: base * (attempt + 1).
    pub fn linear(base: Duration) -> Self {
        Self::with_backoff(Backoff::Linear { base })
    }

    /// Create a policy with exponentially increasing delay: base * 2^attempt.
    pub fn exponential(base: Duration) -> Self {
        Self::with_backoff(Backoff::Exponential { base })
    }

    /// Create a policy with Fibonacci-based delay: base * fib(attempt + 1).
    pub fn fibonacci(base: Duration) -> Self {
        Self::with_backoff(Backoff::Fibonacci { base })
    }

    /// Create a policy from an arbitrary schedule.
    ///
    /// ```rust
    /// use docstore_retry::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::from_fn(|attempt| Duration::from_millis(10 + u64::from(attempt)))
    ///     .with_max_attempts(4);
    /// assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(12));
    /// ```
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self::with_backoff(Backoff::from_fn(f))
    }

    /// Set the total number of attempts, first attempt included.
    ///
    /// Zero is accepted here and rejected by [`validate`](Self::validate).
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Cap every delay at `d`, jitter included.
    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = Some(d);
        self
    }

    /// Add proportional jitter: the delay varies by ±`factor` (clamped to 0..=1).
    /// A NaN or infinite factor means no variation.
    ///
    /// **Note**: Requires the `jitter` feature. Without it, delays are unchanged.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        let factor = if factor.is_finite() {
            factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.jitter = JitterStrategy::Proportional(factor);
        self
    }

    /// Use full jitter: the delay is uniform between zero and the computed delay.
    ///
    /// **Note**: Requires the `jitter` feature. Without it, delays are unchanged.
    pub fn with_full_jitter(mut self) -> Self {
        self.jitter = JitterStrategy::Full;
        self
    }

    /// Total number of attempts, first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The backoff schedule.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// The maximum delay cap.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// The jitter strategy.
    pub fn jitter(&self) -> &JitterStrategy {
        &self.jitter
    }

    /// Delay to wait after the failed attempt with 0-based index `attempt`.
    ///
    /// Consults the backoff schedule exactly once per call.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.backoff.delay(attempt);
        let capped = match self.max_delay {
            Some(max) => base_delay.min(max),
            None => base_delay,
        };
        self.jitter.apply(capped, self.max_delay)
    }

    /// Check the policy's invariants.
    ///
    /// # Errors
    ///
    /// [`PolicyError::ZeroAttempts`] when the attempt budget is zero.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts == 0 {
            Err(PolicyError::ZeroAttempts)
        } else {
            Ok(())
        }
    }
}

impl JitterStrategy {
    /// Apply jitter to a delay, then cap it at `max_delay`.
    pub fn apply(&self, base_delay: Duration, max_delay: Option<Duration>) -> Duration {
        let jittered = match self {
            JitterStrategy::None => base_delay,
            #[cfg(feature = "jitter")]
            JitterStrategy::Proportional(factor) if factor.is_finite() && *factor > 0.0 => {
                use rand::Rng;
                let factor = factor.min(1.0);
                let base_millis = base_delay.as_millis() as f64;
                let jitter_range = base_millis * factor;
                let min = (base_millis - jitter_range).max(0.0);
                let max = base_millis + jitter_range;
                let jittered_millis = rand::rng().random_range(min..=max);
                Duration::from_millis(jittered_millis as u64)
            }
            JitterStrategy::Proportional(_) => base_delay,
            #[cfg(feature = "jitter")]
            JitterStrategy::Full => {
                use rand::Rng;
                let max_millis = base_delay.as_millis() as u64;
                if max_millis == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rand::rng().random_range(0..=max_millis))
                }
            }
            #[cfg(not(feature = "jitter"))]
            JitterStrategy::Full => base_delay,
        };

        match max_delay {
            Some(max) => jittered.min(max),
            None => jittered,
        }
    }
}

/// Calculate the nth Fibonacci number.
fn fibonacci(n: u32) -> u32 {
    if n == 0 {
        return 0;
    }
    let mut a = 0u32;
    let mut b = 1u32;
    for _ in 1..n {
        let temp = a.saturating_add(b);
        a = b;
        b = temp;
    }
    b
}

#[cfg(test)]
mod policy_tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_constant_delay() {
        let policy = RetryPolicy::constant(ms(100));
        for attempt in 0..5 {
            assert_eq!(policy.delay_for_attempt(attempt), ms(100));
        }
    }

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy::linear(ms(100));
        assert_eq!(policy.delay_for_attempt(0), ms(100));
        assert_eq!(policy.delay_for_attempt(1), ms(200));
        assert_eq!(policy.delay_for_attempt(3), ms(400));
    }

    #[test]
    fn test_exponential_delay() {
        let policy = RetryPolicy::exponential(ms(100));
        assert_eq!(policy.delay_for_attempt(0), ms(100));
        assert_eq!(policy.delay_for_attempt(1), ms(200));
        assert_eq!(policy.delay_for_attempt(2), ms(400));
        assert_eq!(policy.delay_for_attempt(3), ms(800));
    }

    #[test]
    fn test_exponential_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::exponential(Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(u64::from(u32::MAX)));
    }

    #[test]
    fn test_fibonacci_delay() {
        let policy = RetryPolicy::fibonacci(ms(100));

        // fib sequence: 1, 1, 2, 3, 5, 8...
        let expected = [100, 100, 200, 300, 500, 800];
        for (attempt, want) in expected.iter().enumerate() {
            assert_eq!(policy.delay_for_attempt(attempt as u32), ms(*want));
        }
    }

    #[test]
    fn test_custom_backoff_is_called_with_attempt_index() {
        let seen = Arc::new(AtomicU32::new(u32::MAX));
        let recorder = Arc::clone(&seen);
        let policy = RetryPolicy::from_fn(move |attempt| {
            recorder.store(attempt, Ordering::SeqCst);
            ms(u64::from(attempt) * 7)
        });

        assert_eq!(policy.delay_for_attempt(3), ms(21));
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = RetryPolicy::exponential(ms(100)).with_max_delay(ms(500));

        assert_eq!(policy.delay_for_attempt(2), ms(400));
        assert_eq!(policy.delay_for_attempt(3), ms(500)); // capped
        assert_eq!(policy.delay_for_attempt(9), ms(500)); // capped
    }

    #[test]
    fn test_default_attempt_budget() {
        let policy = RetryPolicy::linear(ms(1));
        assert_eq!(policy.max_attempts(), RetryPolicy::DEFAULT_MAX_ATTEMPTS);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_new_rejects_zero_attempts() {
        let result = RetryPolicy::new(0, Backoff::Constant(ms(1)));
        assert_eq!(result, Err(PolicyError::ZeroAttempts));
    }

    #[test]
    fn test_validate_zero_attempts_from_builder() {
        let policy = RetryPolicy::constant(ms(1)).with_max_attempts(0);
        assert_eq!(policy.validate(), Err(PolicyError::ZeroAttempts));
    }

    #[test]
    fn test_policy_is_clone() {
        let policy = RetryPolicy::exponential(ms(100)).with_max_attempts(3);
        let cloned = policy.clone();
        assert_eq!(policy, cloned);
    }

    #[test]
    fn test_custom_backoff_equality_is_identity() {
        let a = Backoff::from_fn(|_| ms(1));
        let b = Backoff::from_fn(|_| ms(1));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_policy_is_debug() {
        let policy = RetryPolicy::from_fn(|_| ms(1));
        let debug = format!("{:?}", policy);
        assert!(debug.contains("RetryPolicy"));
        assert!(debug.contains("Custom(<fn>)"));
    }

    #[test]
    fn test_fibonacci_function() {
        let expected = [0, 1, 1, 2, 3, 5, 8, 13];
        for (n, want) in expected.iter().enumerate() {
            assert_eq!(fibonacci(n as u32), *want);
        }
    }

    #[test]
    fn test_jitter_strategy_default() {
        assert_eq!(JitterStrategy::default(), JitterStrategy::None);
    }

    #[test]
    fn test_jitter_none_returns_base_delay() {
        let base = ms(100);
        assert_eq!(JitterStrategy::None.apply(base, None), base);
    }

    #[test]
    fn test_jitter_respects_max_delay() {
        let policy = RetryPolicy::constant(ms(100))
            .with_jitter(1.0)
            .with_max_delay(ms(120));
        for attempt in 0..50 {
            assert!(policy.delay_for_attempt(attempt) <= ms(120));
        }
    }

    #[test]
    fn test_full_jitter_stays_below_computed_delay() {
        let policy = RetryPolicy::constant(ms(100)).with_full_jitter();
        for attempt in 0..50 {
            assert!(policy.delay_for_attempt(attempt) <= ms(100));
        }
    }

    #[test]
    fn test_policy_getters() {
        let policy = RetryPolicy::exponential(ms(100))
            .with_max_attempts(4)
            .with_max_delay(Duration::from_secs(5))
            .with_jitter(0.25);

        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.max_delay(), Some(Duration::from_secs(5)));
        assert!(matches!(policy.jitter(), JitterStrategy::Proportional(_)));
        assert!(matches!(policy.backoff(), Backoff::Exponential { .. }));
    }

    #[test]
    fn test_non_finite_jitter_factor_means_no_jitter() {
        let policy = RetryPolicy::constant(ms(40)).with_jitter(f64::NAN);
        assert_eq!(policy.jitter(), &JitterStrategy::Proportional(0.0));
        assert_eq!(policy.delay_for_attempt(0), ms(40));

        let policy = RetryPolicy::constant(ms(40)).with_jitter(f64::INFINITY);
        assert_eq!(policy.jitter(), &JitterStrategy::Proportional(0.0));

        let raw = JitterStrategy::Proportional(f64::NAN);
        assert_eq!(raw.apply(ms(40), None), ms(40));
    }

    #[test]
    fn test_jitter_factor_is_clamped() {
        let policy = RetryPolicy::constant(ms(1)).with_jitter(4.0);
        assert_eq!(policy.jitter(), &JitterStrategy::Proportional(1.0));
    }
}
