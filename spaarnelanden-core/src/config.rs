//! Which containers to track and how often to refresh them.

use std::collections::HashSet;
use std::time::Duration;

use chrono::TimeDelta;

use crate::model::RegistrationId;

/// Twelve hours, the slowest interval seen in deployments.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
/// Rejected tracker configuration.
pub enum ConfigError {
    /// A container identifier was blank.
    #[error("Empty container identifier")]
    EmptyIdentifier,
    /// The refresh interval was zero.
    #[error("Refresh interval must be positive")]
    ZeroInterval,
    /// A duration does not fit the cache's clock arithmetic.
    #[error("Duration out of range: {0:?}")]
    DurationOutOfRange(Duration),
}

/// Validated tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    containers: Vec<RegistrationId>,
    refresh_interval: Duration,
    cache_ttl: TimeDelta,
}

impl TrackerConfig {
    /// Build a configuration; the cache time-to-live defaults to the refresh interval.
    ///
    /// Identifiers are trimmed and de-duplicated, keeping the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for blank identifiers or an unusable interval.
    pub fn new<I, S>(containers: I, refresh_interval: Duration) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if refresh_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }

        let mut seen = HashSet::new();
        let mut tracked = Vec::new();
        for raw in containers {
            let trimmed = raw.as_ref().trim();
            if trimmed.is_empty() {
                return Err(ConfigError::EmptyIdentifier);
            }
            if seen.insert(trimmed.to_owned()) {
                tracked.push(RegistrationId::from(trimmed));
            }
        }

        Ok(Self {
            containers: tracked,
            refresh_interval,
            cache_ttl: to_time_delta(refresh_interval)?,
        })
    }

    /// Override the cache time-to-live. Zero disables caching between refreshes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DurationOutOfRange`] for durations chrono cannot represent.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Result<Self, ConfigError> {
        self.cache_ttl = to_time_delta(ttl)?;
        Ok(self)
    }

    /// Tracked containers in configuration order.
    #[must_use]
    pub fn containers(&self) -> &[RegistrationId] {
        &self.containers
    }

    /// Period of the background refresh.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Maximum age of a cached dataset.
    #[must_use]
    pub fn cache_ttl(&self) -> TimeDelta {
        self.cache_ttl
    }
}

fn to_time_delta(duration: Duration) -> Result<TimeDelta, ConfigError> {
    TimeDelta::from_std(duration).map_err(|_err| ConfigError::DurationOutOfRange(duration))
}
