//! Commit rate-limiting and append-only log behavior of the sample store.

use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
use garden_station::config::StoreSettings;
use garden_station::parse::{ParsedLine, PumpEvent};
use garden_station::store::{LatestHandle, SampleStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn store_at(dir: &TempDir) -> (SampleStore, LatestHandle, PathBuf) {
    let log_path = dir.path().join("garden_station_log.csv");
    let settings = StoreSettings {
        log_path: log_path.clone(),
        commit_interval: Duration::from_secs(3600),
    };
    let latest: LatestHandle = Arc::default();
    (SampleStore::new(latest.clone(), &settings), latest, log_path)
}

fn noon() -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 3, 5, 12, 0, 0).unwrap()
}

fn update_all(store: &mut SampleStore) {
    store.update_field(&ParsedLine::SoilMoisture(42));
    store.update_field(&ParsedLine::Temperature(21.5));
    store.update_field(&ParsedLine::Humidity(60.0));
}

fn log_lines(path: &PathBuf) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn first_complete_reading_commits_immediately() {
    let dir = TempDir::new().unwrap();
    let (mut store, _, log_path) = store_at(&dir);

    update_all(&mut store);
    assert!(store.maybe_commit(noon()).unwrap());

    let lines = log_lines(&log_path);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "Soil Moisture,Temperature,Humidity,Time,Date,Event");
    assert_eq!(lines[1], "42,21.5,60,12:00:00,2026-03-05,");
}

#[test]
fn incomplete_reading_never_commits() {
    let dir = TempDir::new().unwrap();
    let (mut store, _, log_path) = store_at(&dir);

    store.update_field(&ParsedLine::SoilMoisture(42));
    store.update_field(&ParsedLine::Temperature(21.5));
    assert!(!store.maybe_commit(noon()).unwrap());
    assert!(log_lines(&log_path).is_empty());
}

#[test]
fn commit_window_is_enforced() {
    let dir = TempDir::new().unwrap();
    let (mut store, _, log_path) = store_at(&dir);
    let t = noon();

    update_all(&mut store);
    assert!(store.maybe_commit(t).unwrap());

    // Same instant, no new field updates: nothing to commit.
    assert!(!store.maybe_commit(t).unwrap());

    // New updates inside the window: still rate-limited.
    update_all(&mut store);
    assert!(!store
        .maybe_commit(t + ChronoDuration::minutes(30))
        .unwrap());

    // Window elapsed with fresh updates: commits again.
    assert!(store.maybe_commit(t + ChronoDuration::hours(1)).unwrap());
    assert_eq!(log_lines(&log_path).len(), 3);
}

#[test]
fn events_bypass_the_rate_limiter() {
    let dir = TempDir::new().unwrap();
    let (mut store, _, log_path) = store_at(&dir);
    let t = noon();

    update_all(&mut store);
    assert!(store.maybe_commit(t).unwrap());

    // Three events back to back, all inside the reading commit window.
    store.log_event(PumpEvent::Triggered, t).unwrap();
    store.log_event(PumpEvent::Started, t).unwrap();
    store
        .log_event(PumpEvent::Stopped, t + ChronoDuration::seconds(30))
        .unwrap();

    let lines = log_lines(&log_path);
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[2], ",,,12:00:00,2026-03-05,Pump Triggered");
    assert_eq!(lines[3], ",,,12:00:00,2026-03-05,Pump Started");
    assert_eq!(lines[4], ",,,12:00:30,2026-03-05,Pump Stopped");
}

#[test]
fn header_is_written_exactly_once() {
    let dir = TempDir::new().unwrap();
    let (mut store, _, log_path) = store_at(&dir);
    let t = noon();

    update_all(&mut store);
    store.maybe_commit(t).unwrap();
    update_all(&mut store);
    store.maybe_commit(t + ChronoDuration::hours(2)).unwrap();
    store.log_event(PumpEvent::Started, t + ChronoDuration::hours(3)).unwrap();

    let lines = log_lines(&log_path);
    let headers = lines
        .iter()
        .filter(|l| l.starts_with("Soil Moisture"))
        .count();
    assert_eq!(headers, 1);
    assert_eq!(lines.len(), 4);
}

#[test]
fn existing_log_is_appended_not_rewritten() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("garden_station_log.csv");
    std::fs::write(
        &log_path,
        "Soil moisture,Temp,Humid,Time,Date,Event\n300,18.0,55.0,08:00:00,2026-03-04,\n",
    )
    .unwrap();

    let settings = StoreSettings {
        log_path: log_path.clone(),
        commit_interval: Duration::from_secs(3600),
    };
    let latest: LatestHandle = Arc::default();
    let mut store = SampleStore::new(latest, &settings);
    update_all(&mut store);
    store.maybe_commit(noon()).unwrap();

    let lines = log_lines(&log_path);
    // Legacy header and row untouched, new row appended after them.
    assert_eq!(lines[0], "Soil moisture,Temp,Humid,Time,Date,Event");
    assert_eq!(lines[1], "300,18.0,55.0,08:00:00,2026-03-04,");
    assert_eq!(lines[2], "42,21.5,60,12:00:00,2026-03-05,");
}

#[test]
fn cache_survives_commit_but_pending_mask_does_not() {
    let dir = TempDir::new().unwrap();
    let (mut store, latest, _) = store_at(&dir);
    let t = noon();

    update_all(&mut store);
    store.maybe_commit(t).unwrap();

    // Cache still serves the committed values.
    let snapshot = *latest.read().unwrap();
    assert_eq!(snapshot.soil_moisture, 42);
    assert_eq!(snapshot.temperature, 21.5);

    // But the next window needs a fresh full set of fields.
    assert!(!store.maybe_commit(t + ChronoDuration::hours(2)).unwrap());
}
