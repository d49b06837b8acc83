//! Reaper configuration and duration parsing.

use std::time::Duration;

use crate::error::ConfigError;

/// Timing knobs for the reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    /// How often the sweep loop runs.
    pub poll_interval: Duration,
    /// Idle time after which a workload is reaped.
    pub ttl: Duration,
    /// Upper bound on a single teardown call.
    pub teardown_timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            ttl: Duration::from_secs(30),
            teardown_timeout: Duration::from_secs(30),
        }
    }
}

impl ReaperConfig {
    /// Build a config from duration strings such as `"10s"` or `"2m"`.
    pub fn from_strs(poll_interval: &str, ttl: &str, teardown_timeout: &str) -> Result<Self, ConfigError> {
        let config = Self {
            poll_interval: parse_duration(poll_interval)?,
            ttl: parse_duration(ttl)?,
            teardown_timeout: parse_duration(teardown_timeout)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject zero durations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("poll_interval"));
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::ZeroDuration("ttl"));
        }
        if self.teardown_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("teardown_timeout"));
        }
        Ok(())
    }
}

/// Parse a duration string like "500ms", "5s", "2m", "1h".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let number = |digits: &str| {
        digits
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidDuration(s.to_string()))
    };

    if let Some(ms) = s.strip_suffix("ms") {
        number(ms).map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        number(secs).map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        number(mins).map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        number(hours).map(|h| Duration::from_secs(h * 3600))
    } else {
        number(s).map(Duration::from_secs)
    }
}
