//! Session configuration
//!
//! Defines every interval, timeout and retry bound used by the session:
//! worker polling, connect retries, deployment waits and training pollers.

use std::time::Duration;

/// Session configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployments (local cluster vs. remote workers).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay between automatic refreshes of a worker
    pub poll_interval: Duration,

    /// Timeout of a single `get_worker_info` call
    pub refresh_timeout: Duration,

    /// Pause before the single retry of a refresh that hit "not yet initialized"
    pub refresh_retry_delay: Duration,

    /// Attempts at the first `get_worker_info` while a manager is initializing
    pub connect_max_attempts: u32,

    /// Pause between those attempts
    pub connect_retry_delay: Duration,

    /// Polls while waiting for a new deployment to settle
    pub deploy_poll_attempts: u32,

    /// Pause between deployment polls
    pub deploy_poll_interval: Duration,

    /// Lifetime of tokens minted for deployed applications
    pub token_lifetime: Duration,

    /// Training status poll interval while a run is active
    pub status_poll_interval: Duration,

    /// Training history poll interval while a run is active
    pub history_poll_interval: Duration,

    /// Timeout passed to the orchestrator's `start_training`
    pub training_timeout: Duration,

    /// Timeout of info lookups
    pub info_timeout: Duration,
}

impl SessionConfig {
    /// Creates a configuration with the default bounds
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            refresh_timeout: Duration::from_secs(10),
            refresh_retry_delay: Duration::from_secs(2),
            connect_max_attempts: 12,
            connect_retry_delay: Duration::from_millis(2500),
            deploy_poll_attempts: 40,
            deploy_poll_interval: Duration::from_millis(500),
            token_lifetime: Duration::from_secs(30 * 24 * 60 * 60), // 30 days
            status_poll_interval: Duration::from_secs(3),
            history_poll_interval: Duration::from_secs(2),
            training_timeout: Duration::from_secs(600),
            info_timeout: Duration::from_secs(10),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional; unset or unparsable values keep the default.
    /// - CHIRON_POLL_INTERVAL_MS
    /// - CHIRON_REFRESH_TIMEOUT_MS
    /// - CHIRON_CONNECT_MAX_ATTEMPTS
    /// - CHIRON_DEPLOY_POLL_ATTEMPTS
    /// - CHIRON_STATUS_POLL_INTERVAL_MS
    /// - CHIRON_HISTORY_POLL_INTERVAL_MS
    /// - CHIRON_TRAINING_TIMEOUT_SECS
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::new();

        let config = Self {
            poll_interval: env_millis("CHIRON_POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval),
            refresh_timeout: env_millis("CHIRON_REFRESH_TIMEOUT_MS")
                .unwrap_or(defaults.refresh_timeout),
            connect_max_attempts: env_parse("CHIRON_CONNECT_MAX_ATTEMPTS")
                .unwrap_or(defaults.connect_max_attempts),
            deploy_poll_attempts: env_parse("CHIRON_DEPLOY_POLL_ATTEMPTS")
                .unwrap_or(defaults.deploy_poll_attempts),
            status_poll_interval: env_millis("CHIRON_STATUS_POLL_INTERVAL_MS")
                .unwrap_or(defaults.status_poll_interval),
            history_poll_interval: env_millis("CHIRON_HISTORY_POLL_INTERVAL_MS")
                .unwrap_or(defaults.history_poll_interval),
            training_timeout: env_parse::<u64>("CHIRON_TRAINING_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.training_timeout),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.refresh_timeout.is_zero() || self.info_timeout.is_zero() {
            anyhow::bail!("timeouts must be greater than 0");
        }

        if self.connect_max_attempts == 0 {
            anyhow::bail!("connect_max_attempts must be greater than 0");
        }

        if self.deploy_poll_attempts == 0 || self.deploy_poll_interval.is_zero() {
            anyhow::bail!("deployment polling needs at least one attempt and a non-zero interval");
        }

        if self.status_poll_interval.is_zero() || self.history_poll_interval.is_zero() {
            anyhow::bail!("training poll intervals must be greater than 0");
        }

        if self.training_timeout.as_secs() == 0 {
            anyhow::bail!("training_timeout must be at least one second");
        }

        Ok(())
    }

    /// Upper bound of the wait for a deployment to settle
    pub fn deploy_wait_budget(&self) -> Duration {
        self.deploy_poll_interval * self.deploy_poll_attempts
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.connect_max_attempts, 12);
        assert_eq!(config.deploy_wait_budget(), Duration::from_secs(20));
        assert_eq!(config.token_lifetime.as_secs(), 2_592_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SessionConfig::default();

        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.poll_interval = Duration::from_secs(1);

        config.deploy_poll_attempts = 0;
        assert!(config.validate().is_err());
        config.deploy_poll_attempts = 1;

        config.training_timeout = Duration::from_millis(500);
        assert!(config.validate().is_err());
        config.training_timeout = Duration::from_secs(1);

        assert!(config.validate().is_ok());
    }
}
