//! Configuration for the relay.
//! Parsed from a TOML file with `[mailserver]` and `[timesource]` sections.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use susurrus_timesource::{
    TimeSourceConfig, DEFAULT_ALLOWED_FAILURES, DEFAULT_FAST_SYNC_PERIOD, DEFAULT_NTP_SERVERS,
    DEFAULT_SLOW_SYNC_PERIOD,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub mailserver: MailServerSection,
    #[serde(default)]
    pub timesource: TimeSourceSection,
}

/// MailServer settings. `data_dir` and `password` are required at init
/// time; the other fields have working defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailServerSection {
    #[serde(default)]
    pub data_dir: String,
    #[serde(default)]
    pub password: String,
    /// Floor for proof-of-work accepted from the overlay. 0 disables.
    #[serde(default)]
    pub minimum_pow: f64,
    /// Seconds between admitted requests per peer. 0 disables the limiter.
    #[serde(default)]
    pub rate_limit_secs: u64,
}

impl MailServerSection {
    pub fn rate_limit(&self) -> Option<Duration> {
        if self.rate_limit_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.rate_limit_secs))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSourceSection {
    #[serde(default = "default_ntp_servers")]
    pub servers: Vec<String>,
    #[serde(default = "default_allowed_failures")]
    pub allowed_failures: usize,
    #[serde(default = "default_fast_sync_period_secs")]
    pub fast_sync_period_secs: u64,
    #[serde(default = "default_slow_sync_period_secs")]
    pub slow_sync_period_secs: u64,
}

impl Default for TimeSourceSection {
    fn default() -> Self {
        Self {
            servers: default_ntp_servers(),
            allowed_failures: default_allowed_failures(),
            fast_sync_period_secs: default_fast_sync_period_secs(),
            slow_sync_period_secs: default_slow_sync_period_secs(),
        }
    }
}

impl TimeSourceSection {
    /// Convert to the timesource crate's runtime config.
    pub fn timesource_config(&self) -> TimeSourceConfig {
        TimeSourceConfig {
            servers: self.servers.clone(),
            allowed_failures: self.allowed_failures,
            fast_sync_period: Duration::from_secs(self.fast_sync_period_secs),
            slow_sync_period: Duration::from_secs(self.slow_sync_period_secs),
        }
    }
}

// Default value functions
fn default_ntp_servers() -> Vec<String> {
    DEFAULT_NTP_SERVERS.iter().map(|s| s.to_string()).collect()
}
fn default_allowed_failures() -> usize {
    DEFAULT_ALLOWED_FAILURES
}
fn default_fast_sync_period_secs() -> u64 {
    DEFAULT_FAST_SYNC_PERIOD.as_secs()
}
fn default_slow_sync_period_secs() -> u64 {
    DEFAULT_SLOW_SYNC_PERIOD.as_secs()
}

impl RelayConfig {
    /// Load config from file, or fall back to defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: RelayConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mailserver: MailServerSection::default(),
            timesource: TimeSourceSection::default(),
        }
    }
}
