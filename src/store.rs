//! Latest-reading cache and the append-only durable log.
//!
//! Two pieces of state with different lifetimes:
//!
//! - The **latest-reading cache** is updated on every parsed field and read
//!   by the web surface without the ingestion lock. It persists across
//!   commits. Readers may observe a cycle mid-update (one or two fields
//!   already refreshed); that is accepted eventual consistency.
//! - The **pending-field mask** tracks which of the three fields have arrived
//!   since the last commit. A commit requires all three, plus an elapsed
//!   rate-limit window, and resets the mask.
//!
//! The log file is append-only: once it has a header it is never rewritten,
//! only extended. Pump events bypass the rate limiter and are appended
//! immediately.

use crate::config::StoreSettings;
use crate::error::Result;
use crate::parse::{ParsedLine, PumpEvent};
use chrono::{DateTime, Local};
use log::info;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

/// Header of the durable log. Chart regeneration tolerates case/spacing
/// variants of these names, but this is what new files get.
pub const LOG_HEADER: [&str; 6] = [
    "Soil Moisture",
    "Temperature",
    "Humidity",
    "Time",
    "Date",
    "Event",
];

/// The most recent value seen for each sensor field. Served verbatim on
/// `GET /data`; zeros until the first line arrives.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatestReading {
    /// Raw soil moisture (ADC counts).
    pub soil_moisture: i64,
    /// Air temperature in degrees Celsius.
    pub temperature: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
}

/// Shared handle to the latest-reading cache.
pub type LatestHandle = Arc<RwLock<LatestReading>>;

#[derive(Debug, Clone, Copy, Default)]
struct PendingFields {
    soil: bool,
    temperature: bool,
    humidity: bool,
}

impl PendingFields {
    fn complete(&self) -> bool {
        self.soil && self.temperature && self.humidity
    }
}

/// In-memory cache plus rate-limited append-only CSV log.
pub struct SampleStore {
    latest: LatestHandle,
    pending: PendingFields,
    last_commit: Option<DateTime<Local>>,
    commit_interval: chrono::Duration,
    log_path: PathBuf,
}

impl SampleStore {
    /// Store writing to the log described by `settings`, publishing into the
    /// shared `latest` cache.
    pub fn new(latest: LatestHandle, settings: &StoreSettings) -> Self {
        Self {
            latest,
            pending: PendingFields::default(),
            last_commit: None,
            commit_interval: chrono::Duration::from_std(settings.commit_interval)
                .unwrap_or(chrono::Duration::MAX),
            log_path: settings.log_path.clone(),
        }
    }

    /// Apply one parsed reading field: unconditional cache update plus
    /// pending-mask bookkeeping. Pump events and unknown lines are no-ops
    /// here.
    pub fn update_field(&mut self, line: &ParsedLine) {
        let mut latest = self
            .latest
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match line {
            ParsedLine::SoilMoisture(v) => {
                latest.soil_moisture = *v;
                self.pending.soil = true;
            }
            ParsedLine::Temperature(v) => {
                latest.temperature = *v;
                self.pending.temperature = true;
            }
            ParsedLine::Humidity(v) => {
                latest.humidity = *v;
                self.pending.humidity = true;
            }
            ParsedLine::Pump(_) | ParsedLine::Unknown => {}
        }
    }

    /// Commit the cached reading if all three fields have arrived since the
    /// last commit and the rate-limit window has elapsed. The first complete
    /// reading after startup commits immediately.
    ///
    /// Returns whether a row was written.
    pub fn maybe_commit(&mut self, now: DateTime<Local>) -> Result<bool> {
        if !self.pending.complete() {
            return Ok(false);
        }
        if let Some(last) = self.last_commit {
            if now - last < self.commit_interval {
                return Ok(false);
            }
        }

        let reading = *self
            .latest
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.append_row(
            &[
                reading.soil_moisture.to_string(),
                reading.temperature.to_string(),
                reading.humidity.to_string(),
                now.format("%H:%M:%S").to_string(),
                now.format("%Y-%m-%d").to_string(),
                String::new(),
            ],
        )?;
        self.pending = PendingFields::default();
        self.last_commit = Some(now);
        info!(
            "committed reading (moisture {}, temp {}, humidity {})",
            reading.soil_moisture, reading.temperature, reading.humidity
        );
        Ok(true)
    }

    /// Append a pump event row immediately, independent of the reading rate
    /// limiter.
    pub fn log_event(&mut self, event: PumpEvent, now: DateTime<Local>) -> Result<()> {
        self.append_row(&[
            String::new(),
            String::new(),
            String::new(),
            now.format("%H:%M:%S").to_string(),
            now.format("%Y-%m-%d").to_string(),
            event.label().to_string(),
        ])?;
        info!("logged event: {}", event.label());
        Ok(())
    }

    /// Timestamp of the last committed reading, if any this process lifetime.
    pub fn last_commit(&self) -> Option<DateTime<Local>> {
        self.last_commit
    }

    fn append_row(&self, fields: &[String]) -> Result<()> {
        let new_file = !self.log_path.exists()
            || std::fs::metadata(&self.log_path).map(|m| m.len()).unwrap_or(0) == 0;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if new_file {
            writer.write_record(LOG_HEADER)?;
        }
        writer.write_record(fields)?;
        writer.flush()?;
        Ok(())
    }
}
