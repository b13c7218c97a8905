// ============================================================================
// Engine Configuration
// Runtime settings for the dispatch layer and the persistence workers
// ============================================================================

use crate::error::ConfigError;
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "MATCHBOOK_";

// ============================================================================
// Retry Policy
// ============================================================================

/// Exponential backoff for collaborator writes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RetryPolicy {
    /// Total attempts per write, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-based) has failed.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// Engine Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineConfig {
    /// Capacity of each instrument's command mailbox
    pub mailbox_capacity: usize,

    /// Default number of price levels in book snapshots
    pub snapshot_depth: usize,

    /// Instruments recovered and started eagerly by the dispatcher.
    /// Others are opened on their first command.
    pub instruments: Vec<String>,

    /// Backoff applied to store writes and recovery reads
    pub retry: RetryPolicy,

    /// Finished orders each engine remembers for repeat cancels and
    /// duplicate-id checks. The oldest are forgotten first.
    pub retired_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
            snapshot_depth: 10,
            instruments: Vec::new(),
            retry: RetryPolicy::default(),
            retired_capacity: 100_000,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: Set mailbox capacity
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Builder method: Set default snapshot depth
    pub fn with_snapshot_depth(mut self, depth: usize) -> Self {
        self.snapshot_depth = depth;
        self
    }

    /// Builder method: Add an instrument to open at start
    pub fn with_instrument(mut self, instrument: impl Into<String>) -> Self {
        self.instruments.push(instrument.into());
        self
    }

    /// Builder method: Set retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builder method: Set how many finished orders each engine remembers
    pub fn with_retired_capacity(mut self, capacity: usize) -> Self {
        self.retired_capacity = capacity;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "mailbox capacity must be positive".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry policy needs at least one attempt".to_string(),
            ));
        }

        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(ConfigError::Invalid(
                "initial backoff cannot exceed max backoff".to_string(),
            ));
        }

        if self.instruments.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "instrument names cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Load from `MATCHBOOK_*` environment variables, reading `.env` first.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var::<usize, _>(&lookup, "MAILBOX_CAPACITY")? {
            config.mailbox_capacity = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "SNAPSHOT_DEPTH")? {
            config.snapshot_depth = v;
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = v;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "RETRY_INITIAL_BACKOFF_MS")? {
            config.retry.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "RETRY_MAX_BACKOFF_MS")? {
            config.retry.max_backoff = Duration::from_millis(ms);
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "RETIRED_CAPACITY")? {
            config.retired_capacity = v;
        }
        if let Some(list) = lookup(&format!("{ENV_PREFIX}INSTRUMENTS")) {
            config.instruments = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{ENV_PREFIX}{name}");
    match lookup(&key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value: raw }),
    }
}
