//! Configuration management.
//!
//! Settings are loaded from a TOML file with `GARDEN_`-prefixed environment
//! overrides layered on top. Every field has a default so the binary runs
//! with no config file at all. Durations are written in human form
//! (`"1h"`, `"5s"`) via `humantime_serde`.

use crate::error::Result;
use config::Config;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// Log level filter for `env_logger` (`error`..`trace`).
    pub log_level: String,
    /// Serial link parameters.
    pub serial: SerialSettings,
    /// Durable log and commit policy.
    pub store: StoreSettings,
    /// Derived chart artifacts.
    pub charts: ChartSettings,
    /// Web surface.
    pub http: HttpSettings,
}

/// Serial link parameters.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SerialSettings {
    /// Device path of the station microcontroller.
    pub port: String,
    /// Line rate; the station firmware talks at 9600.
    pub baud_rate: u32,
    /// Driver read timeout. Expiry with no data is an empty poll, not an
    /// error.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Wait after opening the port so the device can finish its reset.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Minimum wait between reconnect attempts after a transport failure.
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff: Duration,
}

/// Durable log and commit policy.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreSettings {
    /// Path of the append-only CSV log.
    pub log_path: PathBuf,
    /// Minimum interval between committed readings. Pump events are exempt.
    #[serde(with = "humantime_serde")]
    pub commit_interval: Duration,
}

/// Derived chart artifacts.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChartSettings {
    /// Directory the rendered PNGs are written to and served from.
    pub output_dir: PathBuf,
    /// Age beyond which the charts are considered stale and regenerated.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

/// Web surface.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpSettings {
    /// Bind address for the HTTP listener.
    pub bind: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            serial: SerialSettings::default(),
            store: StoreSettings::default(),
            charts: ChartSettings::default(),
            http: HttpSettings::default(),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".into(),
            baud_rate: 9600,
            read_timeout: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
            reconnect_backoff: Duration::from_secs(5),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("garden_station_log.csv"),
            commit_interval: Duration::from_secs(3600),
        }
    }
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("static"),
            max_age: Duration::from_secs(12 * 3600),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".into(),
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file plus `GARDEN_` environment
    /// overrides (e.g. `GARDEN_SERIAL__PORT=/dev/ttyUSB0`).
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(path));
        } else {
            builder = builder.add_source(
                config::File::with_name("garden-station").required(false),
            );
        }
        let s = builder
            .add_source(config::Environment::with_prefix("GARDEN").separator("__"))
            .build()?;

        Ok(s.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_station_firmware() {
        let s = Settings::default();
        assert_eq!(s.serial.baud_rate, 9600);
        assert_eq!(s.serial.settle_delay, Duration::from_secs(2));
        assert_eq!(s.serial.reconnect_backoff, Duration::from_secs(5));
        assert_eq!(s.store.commit_interval, Duration::from_secs(3600));
        assert_eq!(s.charts.max_age, Duration::from_secs(12 * 3600));
    }

    #[test]
    fn loads_without_config_file() {
        let s = Settings::new(None).expect("defaults should always load");
        assert_eq!(s.http.bind, "0.0.0.0:8000");
    }
}
