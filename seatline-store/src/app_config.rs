use seatline_core::refresh::RefreshSettings;
use seatline_core::LagSettings;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

/// The replica that serves reporting queries.
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    pub url: String,
    /// Materialized views rebuilt on every refresh, in order.
    pub views: Vec<String>,
    #[serde(default = "default_true")]
    pub concurrently: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReplicationConfig {
    /// Restricts the lag query to one walsender / subscription.
    pub application_name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_lag_target_ms")]
    pub lag_target_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_true")]
    pub follow_up: bool,
}

fn default_debounce_ms() -> u64 { 1000 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_lag_target_ms() -> u64 { 1000 }
fn default_max_wait_ms() -> u64 { 10_000 }
fn default_true() -> bool { true }

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            lag_target_ms: default_lag_target_ms(),
            max_wait_ms: default_max_wait_ms(),
            follow_up: true,
        }
    }
}

impl RefreshConfig {
    pub fn settings(&self) -> RefreshSettings {
        RefreshSettings {
            debounce: Duration::from_millis(self.debounce_ms),
            lag: LagSettings {
                poll_interval_ms: self.poll_interval_ms,
                lag_target_ms: self.lag_target_ms,
                max_wait_ms: self.max_wait_ms,
            },
            follow_up: self.follow_up,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `SEATLINE_REFRESH__DEBOUNCE_MS=250`
            .add_source(config::Environment::with_prefix("SEATLINE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
