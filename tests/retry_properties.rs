//! Property-based tests for the retry executor.

use docstore_retry::testing::{RecordingLogger, TrackingSleeper};
use docstore_retry::{ErrorSentinel, Executor, RetryError, RetryPolicy, SkipList};
use proptest::prelude::*;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
struct Fault(u8);

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault {}", self.0)
    }
}

impl std::error::Error for Fault {}

fn policy_strategy() -> impl Strategy<Value = RetryPolicy> {
    (1u32..=8, 0u64..50, 0u8..4).prop_map(|(attempts, base, shape)| {
        let base = Duration::from_millis(base);
        let policy = match shape {
            0 => RetryPolicy::constant(base),
            1 => RetryPolicy::linear(base),
            2 => RetryPolicy::exponential(base),
            _ => RetryPolicy::fibonacci(base),
        };
        policy.with_max_attempts(attempts)
    })
}

proptest! {
    #[test]
    fn always_failing_runs_exactly_max_attempts(policy in policy_strategy(), code in 0u8..10) {
        let sleeper = TrackingSleeper::new();
        let logger = RecordingLogger::new();
        let mut calls = 0u32;

        let result: Result<(), _> = Executor::new(&logger, &policy)
            .sleeper(&sleeper)
            .run(|| {
                calls += 1;
                Err(Fault(code))
            });

        let n = policy.max_attempts();
        prop_assert_eq!(calls, n);
        prop_assert_eq!(sleeper.calls().len() as u32, n - 1);
        prop_assert_eq!(logger.warnings().len() as u32, n - 1);
        match result {
            Err(RetryError::Exhausted(exhausted)) => {
                prop_assert_eq!(exhausted.attempts, n);
                prop_assert_eq!(exhausted.final_error, Fault(code));
            }
            other => prop_assert!(false, "expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn success_on_attempt_k_uses_leading_backoff_delays(
        policy in policy_strategy(),
        k_seed in any::<u32>(),
    ) {
        let k = 1 + k_seed % policy.max_attempts();
        let sleeper = TrackingSleeper::new();
        let mut calls = 0u32;

        let result = Executor::new(&RecordingLogger::new(), &policy)
            .sleeper(&sleeper)
            .run(|| {
                calls += 1;
                if calls < k { Err(Fault(0)) } else { Ok(calls) }
            });

        prop_assert_eq!(result, Ok(k));
        prop_assert_eq!(calls, k);
        let expected: Vec<Duration> = (0..k - 1).map(|i| policy.delay_for_attempt(i)).collect();
        prop_assert_eq!(sleeper.calls(), expected);
    }

    #[test]
    fn skip_listed_error_is_never_retried(policy in policy_strategy(), code in 0u8..10) {
        let skip = SkipList::new().with(ErrorSentinel::equal_to(Fault(code)));
        let sleeper = TrackingSleeper::new();
        let mut calls = 0u32;

        let result: Result<(), _> = Executor::new(&RecordingLogger::new(), &policy)
            .skip_list(&skip)
            .sleeper(&sleeper)
            .run(|| {
                calls += 1;
                Err(Fault(code))
            });

        prop_assert_eq!(calls, 1);
        prop_assert!(sleeper.calls().is_empty());
        prop_assert_eq!(result, Err(RetryError::Aborted(Fault(code))));
    }

    #[test]
    fn delays_respect_cap(policy in policy_strategy(), cap in 0u64..100, attempt in 0u32..64) {
        let cap = Duration::from_millis(cap);
        let capped = policy.with_max_delay(cap);
        prop_assert!(capped.delay_for_attempt(attempt) <= cap);
    }
}
