//! Dispatcher configuration with validation.
//!
//! Values come from serde (file or embedding application) and may be
//! overlaid by `GW_DISPATCH_*` environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main dispatcher configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Retry policy applied to retryable dispatch failures
    pub retry: RetryConfig,
    /// Span per dispatch attempt
    pub tracing: TracingConfig,
    /// Proxy response bridge settings
    pub proxy: ProxyConfig,
    /// Dispatch service settings
    pub service: ServiceConfig,
}

impl DispatcherConfig {
    /// Build from defaults overlaid with environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values returned by `lookup` (one call per known variable).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("GW_DISPATCH_MAX_RETRIES") {
            self.retry.max_retries = raw.trim().parse().map_err(|_| {
                ConfigError::InvalidRetry(format!("GW_DISPATCH_MAX_RETRIES: {raw}"))
            })?;
        }
        if let Some(raw) = lookup("GW_DISPATCH_RETRY_DELAY") {
            self.retry.delay = humantime_serde::parse_duration(&raw).map_err(|e| {
                ConfigError::InvalidRetry(format!("GW_DISPATCH_RETRY_DELAY: {e}"))
            })?;
        }
        if let Some(raw) = lookup("GW_DISPATCH_TRACING_ENABLED") {
            self.tracing.enabled = matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(raw) = lookup("GW_DISPATCH_PREFETCH") {
            self.proxy.prefetch = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidLimit(format!("GW_DISPATCH_PREFETCH: {raw}")))?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.delay.is_zero() {
            return Err(ConfigError::InvalidRetry("delay cannot be 0".into()));
        }

        if let BackoffStrategy::Exponential {
            multiplier,
            max_delay,
        } = self.retry.backoff
        {
            if multiplier.is_nan() || multiplier < 1.0 {
                return Err(ConfigError::InvalidRetry(format!(
                    "multiplier must be >= 1.0, got {multiplier}"
                )));
            }
            if max_delay < self.retry.delay {
                return Err(ConfigError::InvalidRetry(
                    "max_delay cannot be smaller than delay".into(),
                ));
            }
        }

        if self.proxy.prefetch == 0 {
            return Err(ConfigError::InvalidLimit("prefetch cannot be 0".into()));
        }

        if self.service.event_buffer == 0 {
            return Err(ConfigError::InvalidLimit("event_buffer cannot be 0".into()));
        }

        Ok(())
    }
}

/// Retry policy for retryable dispatch failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Base delay between attempts
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    /// How the delay grows between attempts
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_secs(3),
            backoff: BackoffStrategy::Fixed,
        }
    }
}

impl RetryConfig {
    /// Delay to wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::Exponential {
                multiplier,
                max_delay,
            } => {
                let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
                let factor = multiplier.powi(exponent);
                let scaled = self.delay.as_secs_f64() * factor;
                if !scaled.is_finite() || scaled >= max_delay.as_secs_f64() {
                    max_delay
                } else {
                    Duration::from_secs_f64(scaled)
                }
            }
        }
    }
}

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// `delay * multiplier^(retry - 1)`, capped at `max_delay`
    Exponential {
        multiplier: f64,
        #[serde(with = "humantime_serde")]
        max_delay: Duration,
    },
}

/// Span per dispatch attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
}

/// Proxy response bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Chunks requested per batch by `InvokerAdapter::from_config`
    pub prefetch: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self { prefetch: 16 }
    }
}

/// Dispatch service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Capacity of the subscription event channel
    pub event_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { event_buffer: 1024 }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid retry policy
    #[error("invalid retry policy: {0}")]
    InvalidRetry(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            // Try parsing as plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
