use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf, time::Duration};

const APP_NAME: &str = "canvas-relay";

/// Represents the configuration settings for the relay.
///
/// Stored with `confy`; missing keys fall back to [`RelayConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    /// "production" or "development".
    pub app_environment: String,

    /// The host the HTTP listener binds to.
    pub app_host: String,

    /// The port the HTTP listener binds to.
    pub app_port: u16,

    /// Default tracing filter when `RUST_LOG` is unset.
    pub rust_log: String,

    pub read_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub write_timeout_secs: u64,
    pub cleanup_delay_secs: u64,
    pub queue_capacity: usize,
    pub history_limit: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let settings = RelaySettings::default();
        RelayConfig {
            app_environment: "production".to_string(),
            app_host: "0.0.0.0".to_string(),
            app_port: 8080,
            rust_log: "info".to_string(),
            read_timeout_secs: settings.read_timeout.as_secs(),
            ping_interval_secs: settings.ping_interval.as_secs(),
            write_timeout_secs: settings.write_timeout.as_secs(),
            cleanup_delay_secs: settings.cleanup_delay.as_secs(),
            queue_capacity: settings.queue_capacity,
            history_limit: settings.history_limit,
        }
    }
}

impl RelayConfig {
    /// Loads the config file, then applies `APP_HOST` / `APP_PORT` overrides.
    pub fn load() -> Result<Self, confy::ConfyError> {
        let cfg: RelayConfig = confy::load(APP_NAME, APP_NAME)?;
        Ok(cfg.with_env_overrides())
    }

    pub fn path() -> Result<PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, APP_NAME)
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = env::var("APP_HOST") {
            self.app_host = host;
        }
        if let Some(port) = env::var("APP_PORT").ok().and_then(|p| p.parse().ok()) {
            self.app_port = port;
        }
        self
    }

    /// The runtime knobs the relay itself consumes.
    pub fn settings(&self) -> RelaySettings {
        let defaults = RelaySettings::default();
        RelaySettings {
            read_timeout: secs_or(self.read_timeout_secs, defaults.read_timeout),
            ping_interval: secs_or(self.ping_interval_secs, defaults.ping_interval),
            write_timeout: secs_or(self.write_timeout_secs, defaults.write_timeout),
            cleanup_delay: Duration::from_secs(self.cleanup_delay_secs),
            queue_capacity: if self.queue_capacity == 0 {
                defaults.queue_capacity
            } else {
                self.queue_capacity
            },
            history_limit: if self.history_limit == 0 {
                defaults.history_limit
            } else {
                self.history_limit
            },
        }
    }
}

fn secs_or(secs: u64, fallback: Duration) -> Duration {
    if secs == 0 {
        fallback
    } else {
        Duration::from_secs(secs)
    }
}

/// Timings and bounds for connections and rooms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// A client that sends nothing (not even a pong) for this long is dropped.
    pub read_timeout: Duration,
    /// Interval between server pings. Must be shorter than `read_timeout`.
    pub ping_interval: Duration,
    /// Deadline for a single frame write.
    pub write_timeout: Duration,
    /// How long an empty room survives before it is reclaimed.
    pub cleanup_delay: Duration,
    /// Capacity of every client outbound queue and every room broadcast queue.
    pub queue_capacity: usize,
    /// Number of canvas snapshots kept per room.
    pub history_limit: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        RelaySettings {
            read_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(54),
            write_timeout: Duration::from_secs(10),
            cleanup_delay: Duration::from_secs(300),
            queue_capacity: 256,
            history_limit: 50,
        }
    }
}
