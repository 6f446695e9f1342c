//! Ledger configuration (lock timeouts and retry budget).

use std::time::Duration;

use thiserror::Error;

pub const ENV_LOCK_TIMEOUT_MS: &str = "STOCK_LEDGER_LOCK_TIMEOUT_MS";
pub const ENV_MAX_RETRIES: &str = "STOCK_LEDGER_MAX_RETRIES";
pub const ENV_RETRY_BACKOFF_MS: &str = "STOCK_LEDGER_RETRY_BACKOFF_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Longest a unit of work waits for one row lock before failing with a
    /// concurrency error.
    pub lock_timeout: Duration,
    /// Extra attempts `transact` makes after a concurrency error.
    pub max_retries: u32,
    /// Base backoff; attempt `n` sleeps `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(5_000),
            max_retries: 3,
            retry_backoff: Duration::from_millis(25),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

impl LedgerConfig {
    /// Read overrides from the environment; unset variables keep defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(ms) = parse_u64(&lookup, ENV_LOCK_TIMEOUT_MS)? {
            cfg.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_u64(&lookup, ENV_MAX_RETRIES)? {
            cfg.max_retries = u32::try_from(n).unwrap_or(u32::MAX);
        }
        if let Some(ms) = parse_u64(&lookup, ENV_RETRY_BACKOFF_MS)? {
            cfg.retry_backoff = Duration::from_millis(ms);
        }
        Ok(cfg)
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

fn parse_u64(
    lookup: &impl Fn(&'static str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: HashMap<&'static str, String> =
            pairs.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = LedgerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, LedgerConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let cfg = LedgerConfig::from_lookup(lookup(&[
            (ENV_LOCK_TIMEOUT_MS, "250"),
            (ENV_MAX_RETRIES, "0"),
            (ENV_RETRY_BACKOFF_MS, " 5 "),
        ]))
        .unwrap();
        assert_eq!(cfg.lock_timeout, Duration::from_millis(250));
        assert_eq!(cfg.max_retries, 0);
        assert_eq!(cfg.retry_backoff, Duration::from_millis(5));
    }

    #[test]
    fn rejects_garbage() {
        let err = LedgerConfig::from_lookup(lookup(&[(ENV_MAX_RETRIES, "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                var: ENV_MAX_RETRIES,
                value: "many".to_string()
            }
        );
    }
}
