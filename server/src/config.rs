use anyhow::Result;
use serde::Deserialize;

/// Application configuration loaded from a TOML file or defaults.
///
/// All timing knobs default to the production values; tests compress them to
/// make liveness behavior observable in milliseconds instead of minutes.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Interval between keep-alive pings on each live session, in seconds.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// How often the sweeper scans for stale device sessions, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// A device session with no inbound traffic for this long is stale.
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,

    /// Alarm engine tick cadence, in seconds.
    #[serde(default = "default_alarm_tick_secs")]
    pub alarm_tick_secs: u64,

    /// A pending one-shot schedule due longer ago than this is expired
    /// without dispatch, in seconds.
    #[serde(default = "default_schedule_grace_secs")]
    pub schedule_grace_secs: u64,

    /// Externally reachable WebSocket URL advertised to devices on
    /// registration. If unset, derived from the request's Host header.
    pub ws_url: Option<String>,
}

fn default_keepalive_secs() -> u64 {
    25
}

fn default_sweep_interval_secs() -> u64 {
    120
}

fn default_stale_threshold_secs() -> u64 {
    600
}

fn default_alarm_tick_secs() -> u64 {
    60
}

fn default_schedule_grace_secs() -> u64 {
    120
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            stale_threshold_secs: default_stale_threshold_secs(),
            alarm_tick_secs: default_alarm_tick_secs(),
            schedule_grace_secs: default_schedule_grace_secs(),
            ws_url: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::de::from_str(&contents)?;
        Ok(config)
    }
}
