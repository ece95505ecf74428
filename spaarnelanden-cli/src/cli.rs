use std::time::Duration;

use clap::Parser;
use spaarnelanden_core::config::{ConfigError, DEFAULT_REFRESH_INTERVAL, TrackerConfig};
use spaarnelanden_provider_web::DEFAULT_TIMEOUT;

const SECS_PER_MINUTE: u64 = 60;
const DEFAULT_INTERVAL_MINUTES: u64 = DEFAULT_REFRESH_INTERVAL.as_secs() / SECS_PER_MINUTE;

/// Keeps fill levels of Spaarnelanden street containers up to date.
#[derive(Parser, Debug, Clone)]
#[command(name = "spaarnelanden", version)]
pub(crate) struct Args {
    /// Registration number of a container to track; repeat or separate with commas.
    #[arg(
        short,
        long = "container",
        env = "SPAARNELANDEN_CONTAINERS",
        value_delimiter = ',',
        required = true
    )]
    pub(crate) containers: Vec<String>,

    /// Minutes between background refreshes.
    #[arg(
        long,
        env = "SPAARNELANDEN_INTERVAL_MINUTES",
        default_value_t = DEFAULT_INTERVAL_MINUTES,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub(crate) interval_minutes: u64,

    /// Maximum age of cached page data in minutes (defaults to the interval).
    #[arg(long, env = "SPAARNELANDEN_TTL_MINUTES")]
    pub(crate) ttl_minutes: Option<u64>,

    /// Request timeout in seconds.
    #[arg(
        long,
        env = "SPAARNELANDEN_TIMEOUT_SECS",
        default_value_t = DEFAULT_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub(crate) timeout_secs: u64,

    /// Fetch the map from another location.
    #[arg(long, env = "SPAARNELANDEN_URL")]
    pub(crate) url: Option<String>,

    /// Refresh once, print the readings as JSON and exit.
    #[arg(long)]
    pub(crate) once: bool,

    /// Enable debug logging.
    #[arg(long, short = 'd')]
    pub(crate) debug: bool,
}

impl Args {
    pub(crate) fn tracker_config(&self) -> Result<TrackerConfig, ConfigError> {
        let config = TrackerConfig::new(&self.containers, minutes(self.interval_minutes))?;
        match self.ttl_minutes {
            Some(ttl) => config.with_cache_ttl(minutes(ttl)),
            None => Ok(config),
        }
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn minutes(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(SECS_PER_MINUTE))
}
