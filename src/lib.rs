//! # Garden Station
//!
//! A small monitoring daemon for a serial-attached garden station: it ingests
//! periodic soil moisture, temperature and humidity readings from the
//! microcontroller, appends them to a rate-limited CSV log, keeps two
//! daily-average charts loosely up to date, and serves the latest reading
//! plus the charts over a minimal web interface.
//!
//! ## Crate Structure
//!
//! - **`config`**: settings loaded from TOML plus environment overrides.
//! - **`error`**: the `StationError` taxonomy; nothing in the ingestion path
//!   is fatal.
//! - **`link`**: the serial connection state machine — open with settle
//!   delay, detect failure, reconnect with backoff.
//! - **`parse`**: classification of raw device lines into readings and pump
//!   events.
//! - **`store`**: the latest-reading cache, the pending-field commit policy,
//!   and the append-only CSV log.
//! - **`chart`**: staleness-gated regeneration of the daily-average PNGs
//!   from the full log.
//! - **`ingest`**: the loop tying link, parser and store together under one
//!   lock.
//! - **`server`**: the `GET /`, `GET /data` and static-chart routes.

pub mod chart;
pub mod config;
pub mod error;
pub mod ingest;
pub mod link;
pub mod parse;
pub mod server;
pub mod store;
