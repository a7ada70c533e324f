//! Serializable retry settings.
//!
//! [`RetryConfig`] is the shape a policy takes in a configuration file. It
//! converts into a validated [`RetryPolicy`] with `TryFrom`.
//!
//! ```rust
//! use docstore_retry::config::RetryConfig;
//! use docstore_retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let config = RetryConfig::from_json(r#"{
//!     "max_attempts": 5,
//!     "backoff": { "strategy": "exponential", "base_ms": 50 },
//!     "max_delay_ms": 400
//! }"#)?;
//!
//! let policy = RetryPolicy::try_from(config)?;
//! assert_eq!(policy.max_attempts(), 5);
//! assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(400));
//! # Ok::<(), docstore_retry::config::ConfigError>(())
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::{Backoff, JitterStrategy, PolicyError, RetryPolicy};

/// Retry settings as they appear in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, first included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay schedule.
    pub backoff: BackoffConfig,
    /// Upper bound on any single delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    /// Randomization applied to each delay.
    #[serde(default)]
    pub jitter: JitterConfig,
}

fn default_max_attempts() -> u32 {
    RetryPolicy::DEFAULT_MAX_ATTEMPTS
}

/// Named backoff schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Same delay every time.
    Constant {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// `base * (attempt + 1)`.
    Linear {
        /// Base delay in milliseconds.
        base_ms: u64,
    },
    /// `base * 2^attempt`.
    Exponential {
        /// Base delay in milliseconds.
        base_ms: u64,
    },
    /// `base * fib(attempt + 1)`.
    Fibonacci {
        /// Base delay in milliseconds.
        base_ms: u64,
    },
}

/// Jitter settings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JitterConfig {
    /// Exact delays.
    #[default]
    None,
    /// Vary each delay by up to ±`factor` of itself.
    Proportional {
        /// Fraction in `0.0..=1.0`.
        factor: f64,
    },
    /// Uniform between zero and the computed delay.
    Full,
}

/// Why a configuration could not become a policy.
#[derive(Debug)]
pub enum ConfigError {
    /// The input was not valid JSON for [`RetryConfig`].
    Parse(serde_json::Error),
    /// The settings describe an invalid policy.
    Policy(PolicyError),
    /// A proportional jitter factor outside `0.0..=1.0`.
    JitterFactor(f64),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(e) => write!(f, "invalid retry config: {}", e),
            ConfigError::Policy(e) => write!(f, "invalid retry policy: {}", e),
            ConfigError::JitterFactor(factor) => {
                write!(f, "jitter factor {} is outside 0.0..=1.0", factor)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Parse(e) => Some(e),
            ConfigError::Policy(e) => Some(e),
            ConfigError::JitterFactor(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<PolicyError> for ConfigError {
    fn from(e: PolicyError) -> Self {
        ConfigError::Policy(e)
    }
}

impl RetryConfig {
    /// Parse settings from JSON.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed input or unknown fields.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Render settings as JSON.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<BackoffConfig> for Backoff {
    fn from(config: BackoffConfig) -> Self {
        match config {
            BackoffConfig::Constant { delay_ms } => Backoff::Constant(Duration::from_millis(delay_ms)),
            BackoffConfig::Linear { base_ms } => Backoff::Linear {
                base: Duration::from_millis(base_ms),
            },
            BackoffConfig::Exponential { base_ms } => Backoff::Exponential {
                base: Duration::from_millis(base_ms),
            },
            BackoffConfig::Fibonacci { base_ms } => Backoff::Fibonacci {
                base: Duration::from_millis(base_ms),
            },
        }
    }
}

impl TryFrom<RetryConfig> for RetryPolicy {
    type Error = ConfigError;

    fn try_from(config: RetryConfig) -> Result<Self, Self::Error> {
        let mut policy = RetryPolicy::new(config.max_attempts, config.backoff.into())?;
        if let Some(ms) = config.max_delay_ms {
            policy = policy.with_max_delay(Duration::from_millis(ms));
        }
        policy = match config.jitter {
            JitterConfig::None => policy,
            JitterConfig::Proportional { factor } if (0.0..=1.0).contains(&factor) => {
                policy.with_jitter(factor)
            }
            JitterConfig::Proportional { factor } => return Err(ConfigError::JitterFactor(factor)),
            JitterConfig::Full => policy.with_full_jitter(),
        };
        Ok(policy)
    }
}

impl From<&JitterStrategy> for JitterConfig {
    fn from(strategy: &JitterStrategy) -> Self {
        match strategy {
            JitterStrategy::None => JitterConfig::None,
            JitterStrategy::Proportional(factor) => JitterConfig::Proportional { factor: *factor },
            JitterStrategy::Full => JitterConfig::Full,
        }
    }
}
