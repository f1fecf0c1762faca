//! Configuration for the retry and rate-limit policies.
//!
//! Delays are stored as integer milliseconds so config files stay flat; the
//! typed accessors hand out `Duration`s.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total invocation attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay_ms: u64,

    /// Upper bound on any computed delay
    pub max_delay_ms: u64,

    /// Growth factor applied per additional attempt
    pub backoff_multiplier: f64,

    /// Add randomness to delays; off by default so delay sequences stay
    /// deterministic
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Admissions allowed inside any trailing window
    pub max_requests: usize,

    /// Length of the trailing admission window
    pub window_ms: u64,

    /// Wait for a slot instead of failing fast when throttled
    pub auto_throttle: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_ms: 60_000,
            auto_throttle: true,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Combined configuration for both policies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
}

/// Configuration builder
pub struct ConfigBuilder {
    config: ResilienceConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.retry.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.retry.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.retry.backoff_multiplier = multiplier;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.retry.jitter = enabled;
        self
    }

    pub fn max_requests(mut self, requests: usize) -> Self {
        self.config.rate_limit.max_requests = requests;
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.config.rate_limit.window_ms = window.as_millis() as u64;
        self
    }

    pub fn auto_throttle(mut self, enabled: bool) -> Self {
        self.config.rate_limit.auto_throttle = enabled;
        self
    }

    pub fn build(self) -> ResilienceConfig {
        self.config
    }
}

/// Load configuration from environment variables.
pub fn from_env() -> ResilienceConfig {
    let mut config = ResilienceConfig::default();

    if let Some(attempts) = env_parse::<u32>("BACKSTOP_MAX_ATTEMPTS") {
        config.retry.max_attempts = attempts;
    }
    if let Some(delay) = env_parse::<u64>("BACKSTOP_INITIAL_DELAY_MS") {
        config.retry.initial_delay_ms = delay;
    }
    if let Some(delay) = env_parse::<u64>("BACKSTOP_MAX_DELAY_MS") {
        config.retry.max_delay_ms = delay;
    }
    if let Some(multiplier) = env_parse::<f64>("BACKSTOP_BACKOFF_MULTIPLIER") {
        config.retry.backoff_multiplier = multiplier;
    }
    if let Some(jitter) = env_parse_bool("BACKSTOP_JITTER") {
        config.retry.jitter = jitter;
    }
    if let Some(requests) = env_parse::<usize>("BACKSTOP_MAX_REQUESTS") {
        config.rate_limit.max_requests = requests;
    }
    if let Some(window) = env_parse::<u64>("BACKSTOP_WINDOW_MS") {
        config.rate_limit.window_ms = window;
    }
    if let Some(throttle) = env_parse_bool("BACKSTOP_AUTO_THROTTLE") {
        config.rate_limit.auto_throttle = throttle;
    }

    config
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.parse().ok())
}

fn env_parse_bool(var: &str) -> Option<bool> {
    let value = std::env::var(var).ok()?;
    Some(value.to_lowercase() == "true" || value == "1")
}

/// Load configuration from a TOML file.
pub fn from_file(
    path: impl AsRef<std::path::Path>,
) -> Result<ResilienceConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ResilienceConfig = toml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ResilienceConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay(), Duration::from_millis(1_000));
        assert_eq!(config.retry.max_delay(), Duration::from_secs(10));
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert!(!config.retry.jitter);
        assert!(config.rate_limit.auto_throttle);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .max_attempts(5)
            .initial_delay(Duration::from_millis(200))
            .backoff_multiplier(3.0)
            .max_requests(10)
            .window(Duration::from_secs(1))
            .auto_throttle(false)
            .build();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 200);
        assert_eq!(config.retry.backoff_multiplier, 3.0);
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window_ms, 1_000);
        assert!(!config.rate_limit.auto_throttle);
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("BACKSTOP_MAX_ATTEMPTS", "7");
        std::env::set_var("BACKSTOP_INITIAL_DELAY_MS", "50");
        std::env::set_var("BACKSTOP_JITTER", "true");
        std::env::set_var("BACKSTOP_MAX_REQUESTS", "5");
        std::env::set_var("BACKSTOP_AUTO_THROTTLE", "false");

        let config = from_env();

        std::env::remove_var("BACKSTOP_MAX_ATTEMPTS");
        std::env::remove_var("BACKSTOP_INITIAL_DELAY_MS");
        std::env::remove_var("BACKSTOP_JITTER");
        std::env::remove_var("BACKSTOP_MAX_REQUESTS");
        std::env::remove_var("BACKSTOP_AUTO_THROTTLE");

        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.initial_delay_ms, 50);
        assert!(config.retry.jitter);
        assert_eq!(config.rate_limit.max_requests, 5);
        assert!(!config.rate_limit.auto_throttle);
        // Untouched fields keep their defaults
        assert_eq!(config.retry.max_delay_ms, 10_000);
    }

    #[test]
    fn test_partial_toml_merges_over_defaults() {
        let config: ResilienceConfig = toml::from_str(
            r#"
            [retry]
            max_attempts = 4
            initial_delay_ms = 250

            [rate_limit]
            max_requests = 2
            window_ms = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.initial_delay_ms, 250);
        // Unset fields keep their defaults
        assert_eq!(config.retry.max_delay_ms, 10_000);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert_eq!(config.rate_limit.max_requests, 2);
        assert!(config.rate_limit.auto_throttle);
    }
}
