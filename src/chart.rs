//! Staleness-gated regeneration of the daily-average charts.
//!
//! The two PNGs are derived artifacts, rebuilt from the full log whenever
//! they are missing or older than the configured age. Regeneration is
//! O(log size) every time; the log grows one row per commit interval, so a
//! full rescan stays cheap and the staleness gate keeps it infrequent.
//!
//! The pipeline tolerates the historical mess in real log files: header name
//! variants (`Temp`/`Temperature`, case and spacing differences) and two date
//! shapes (`%Y-%m-%d` and `%m/%d/%Y`). Rows where any numeric field is
//! exactly zero are rejected — the station hardware reports zero when a
//! sensor returned no valid data, so a zero column is noise, not a reading.
//! That convention is lossy for a genuinely bone-dry sensor; it applies only
//! here, never to the live cache.
//!
//! Every failure is soft: the previous artifacts stay in place and the next
//! staleness check retries.

use crate::config::ChartSettings;
use crate::error::{Result, StationError};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::{info, warn};
use plotters::prelude::*;
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

/// File name of the soil moisture chart.
pub const SOIL_CHART: &str = "soil_moisture_graph.png";
/// File name of the temperature + humidity chart.
pub const CLIMATE_CHART: &str = "temp_humidity_graph.png";

/// Per-day mean of the three sensor fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayMean {
    /// Calendar date the rows were grouped under.
    pub date: NaiveDate,
    /// Mean soil moisture.
    pub soil_moisture: f64,
    /// Mean temperature.
    pub temperature: f64,
    /// Mean humidity.
    pub humidity: f64,
}

/// Decides when the charts are stale and rebuilds them from the log.
pub struct ChartRefresher {
    log_path: PathBuf,
    output_dir: PathBuf,
    max_age: Duration,
    // Regeneration is reachable from both the ingestion thread and the web
    // surface; they must not race on the shared temp files.
    regen_lock: Mutex<()>,
}

impl ChartRefresher {
    /// Refresher reading `log_path` and writing into the directory from
    /// `settings`.
    pub fn new(log_path: PathBuf, settings: &ChartSettings) -> Self {
        Self {
            log_path,
            output_dir: settings.output_dir.clone(),
            max_age: settings.max_age,
            regen_lock: Mutex::new(()),
        }
    }

    /// Path of the soil moisture PNG.
    pub fn soil_chart_path(&self) -> PathBuf {
        self.output_dir.join(SOIL_CHART)
    }

    /// Path of the temperature + humidity PNG.
    pub fn climate_chart_path(&self) -> PathBuf {
        self.output_dir.join(CLIMATE_CHART)
    }

    /// Regenerate the charts if they are missing or too old. Failures are
    /// logged and swallowed; the previous artifacts stay in place.
    pub fn refresh_if_stale(&self) {
        if !self.is_stale() {
            return;
        }
        let _guard = self.regen_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have regenerated while we waited for the lock.
        if !self.is_stale() {
            return;
        }
        match self.regenerate_locked() {
            Ok(()) => info!("charts regenerated"),
            Err(e) => warn!("chart regeneration skipped: {e}"),
        }
    }

    /// Whether the artifacts are due for regeneration.
    pub fn is_stale(&self) -> bool {
        let modified = std::fs::metadata(self.soil_chart_path())
            .and_then(|m| m.modified())
            .ok();
        is_stale(modified, SystemTime::now(), self.max_age)
    }

    /// Rebuild both charts from the full log, replacing the stored files
    /// atomically. Errors leave any prior artifacts untouched.
    pub fn regenerate(&self) -> Result<()> {
        let _guard = self.regen_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.regenerate_locked()
    }

    fn regenerate_locked(&self) -> Result<()> {
        let days = load_daily_means(&self.log_path)?;
        if days.is_empty() {
            return Err(StationError::ArtifactRegen(
                "no day groups after filtering, keeping prior charts".into(),
            ));
        }
        std::fs::create_dir_all(&self.output_dir)?;

        // The temp files keep a .png extension: the bitmap backend picks the
        // encoder from the extension at present() time.
        let soil_tmp = self.output_dir.join(format!(".{SOIL_CHART}.tmp.png"));
        render_soil_chart(&soil_tmp, &days)?;
        std::fs::rename(&soil_tmp, self.soil_chart_path())?;

        let climate_tmp = self.output_dir.join(format!(".{CLIMATE_CHART}.tmp.png"));
        render_climate_chart(&climate_tmp, &days)?;
        std::fs::rename(&climate_tmp, self.climate_chart_path())?;
        Ok(())
    }
}

/// Staleness policy: stale when the artifact is missing or its modification
/// time is older than `now - max_age`.
pub fn is_stale(modified: Option<SystemTime>, now: SystemTime, max_age: Duration) -> bool {
    match modified {
        None => true,
        Some(mtime) => match now.duration_since(mtime) {
            Ok(age) => age > max_age,
            // Modified in the future (clock jumped); treat as fresh.
            Err(_) => false,
        },
    }
}

/// Normalize a header cell for lookup: trim, lowercase, spaces to
/// underscores.
fn normalize_header(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Read the full log and reduce it to per-day means, applying the
/// zero-is-invalid and coerce-or-drop rules.
pub fn load_daily_means(log_path: &Path) -> Result<Vec<DayMean>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(log_path)
        .map_err(|e| StationError::ArtifactRegen(format!("cannot read log: {e}")))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| StationError::ArtifactRegen(format!("cannot read header: {e}")))?
        .iter()
        .map(normalize_header)
        .collect();
    let column = |names: &[&str]| -> Option<usize> {
        headers
            .iter()
            .position(|h| names.contains(&h.as_str()))
    };

    let soil_col = column(&["soil_moisture"]);
    let temp_col = column(&["temperature", "temp"]);
    let hum_col = column(&["humidity", "humid"]);
    let time_col = column(&["time"]);
    let date_col = column(&["date"]);
    let (Some(soil_col), Some(temp_col), Some(hum_col), Some(time_col), Some(date_col)) =
        (soil_col, temp_col, hum_col, time_col, date_col)
    else {
        return Err(StationError::ArtifactRegen(format!(
            "log is missing required columns (found {headers:?})"
        )));
    };

    let mut by_day: BTreeMap<NaiveDate, Vec<(f64, f64, f64)>> = BTreeMap::new();
    for record in reader.records() {
        let Ok(record) = record else { continue };
        let field = |i: usize| record.get(i).unwrap_or("").trim();

        // Coerce-or-drop, then the zero-is-invalid filter.
        let (Ok(soil), Ok(temp), Ok(hum)) = (
            field(soil_col).parse::<f64>(),
            field(temp_col).parse::<f64>(),
            field(hum_col).parse::<f64>(),
        ) else {
            continue;
        };
        if soil == 0.0 || temp == 0.0 || hum == 0.0 {
            continue;
        }
        let Some(timestamp) = parse_timestamp(field(date_col), field(time_col)) else {
            continue;
        };
        by_day
            .entry(timestamp.date())
            .or_default()
            .push((soil, temp, hum));
    }

    Ok(by_day
        .into_iter()
        .map(|(date, rows)| {
            let n = rows.len() as f64;
            let (soil, temp, hum) = rows.iter().fold((0.0, 0.0, 0.0), |acc, r| {
                (acc.0 + r.0, acc.1 + r.1, acc.2 + r.2)
            });
            DayMean {
                date,
                soil_moisture: soil / n,
                temperature: temp / n,
                humidity: hum / n,
            }
        })
        .collect())
}

/// Combine the log's separate Date and Time cells into one timestamp. Both
/// historical date shapes are accepted.
fn parse_timestamp(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date, "%m/%d/%Y"))
        .ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S").ok()?;
    Some(date.and_time(time))
}

fn date_range(days: &[DayMean]) -> Range<NaiveDate> {
    let first = days[0].date;
    let last = days[days.len() - 1].date;
    if first == last {
        // Degenerate single-day span; pad so the axis has width.
        first..last + chrono::Duration::days(1)
    } else {
        first..last
    }
}

fn padded_range(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let pad = ((max - min) * 0.1).max(1.0);
    (min - pad)..(max + pad)
}

fn render_soil_chart(path: &Path, days: &[DayMean]) -> Result<()> {
    let root = BitMapBackend::new(path, (1000, 500)).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| StationError::ArtifactRegen(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Daily Average Soil Moisture", ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(60)
        .build_cartesian_2d(
            date_range(days),
            padded_range(days.iter().map(|d| d.soil_moisture)),
        )
        .map_err(|e| StationError::ArtifactRegen(e.to_string()))?;

    chart
        .configure_mesh()
        .x_desc("Date")
        .y_desc("Soil Moisture")
        .x_label_formatter(&|d| d.format("%Y-%m-%d").to_string())
        .draw()
        .map_err(|e| StationError::ArtifactRegen(e.to_string()))?;

    chart
        .draw_series(LineSeries::new(
            days.iter().map(|d| (d.date, d.soil_moisture)),
            &BLUE,
        ))
        .map_err(|e| StationError::ArtifactRegen(e.to_string()))?
        .label("Soil Moisture")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    chart
        .draw_series(
            days.iter()
                .map(|d| Circle::new((d.date, d.soil_moisture), 3, BLUE.filled())),
        )
        .map_err(|e| StationError::ArtifactRegen(e.to_string()))?;

    chart
        .configure_series_labels()
        .border_style(BLACK)
        .background_style(WHITE.mix(0.8))
        .draw()
        .map_err(|e| StationError::ArtifactRegen(e.to_string()))?;

    root.present()
        .map_err(|e| StationError::ArtifactRegen(e.to_string()))?;
    Ok(())
}

fn render_climate_chart(path: &Path, days: &[DayMean]) -> Result<()> {
    let root = BitMapBackend::new(path, (1000, 500)).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| StationError::ArtifactRegen(e.to_string()))?;

    let values = days
        .iter()
        .flat_map(|d| [d.temperature, d.humidity].into_iter());
    let mut chart = ChartBuilder::on(&root)
        .caption("Daily Average Temperature & Humidity", ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(60)
        .build_cartesian_2d(date_range(days), padded_range(values))
        .map_err(|e| StationError::ArtifactRegen(e.to_string()))?;

    chart
        .configure_mesh()
        .x_desc("Date")
        .y_desc("Values")
        .x_label_formatter(&|d| d.format("%Y-%m-%d").to_string())
        .draw()
        .map_err(|e| StationError::ArtifactRegen(e.to_string()))?;

    chart
        .draw_series(LineSeries::new(
            days.iter().map(|d| (d.date, d.temperature)),
            &RED,
        ))
        .map_err(|e| StationError::ArtifactRegen(e.to_string()))?
        .label("Temperature (°C)")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
    chart
        .draw_series(LineSeries::new(
            days.iter().map(|d| (d.date, d.humidity)),
            &GREEN,
        ))
        .map_err(|e| StationError::ArtifactRegen(e.to_string()))?
        .label("Humidity (%)")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], GREEN));

    chart
        .configure_series_labels()
        .border_style(BLACK)
        .background_style(WHITE.mix(0.8))
        .draw()
        .map_err(|e| StationError::ArtifactRegen(e.to_string()))?;

    root.present()
        .map_err(|e| StationError::ArtifactRegen(e.to_string()))?;
    Ok(())
}
