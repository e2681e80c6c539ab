//! Custom error types for the application.
//!
//! This module defines the primary error type, `StationError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failures this system expects in normal
//! operation: a flaky serial link, garbage lines from the device, disk trouble
//! on the append-only log, and chart regeneration falling over.
//!
//! Propagation policy (see the ingestion loop): none of these are fatal.
//! `LinkUnavailable` is retried with backoff, `MalformedReading` skips the
//! line, `LogWrite` loses one commit cycle, and `ArtifactRegen` leaves the
//! previous charts in place.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type Result<T> = std::result::Result<T, StationError>;

/// Application-wide error taxonomy.
#[derive(Error, Debug)]
pub enum StationError {
    /// Serial port could not be opened, or the open handle failed mid-read.
    /// Retried with backoff, never fatal.
    #[error("serial link unavailable: {0}")]
    LinkUnavailable(String),

    /// A recognized reading prefix carried a payload that does not parse as a
    /// number. The line is dropped and the loop continues.
    #[error("malformed reading in line {line:?}: {reason}")]
    MalformedReading {
        /// The raw line as received from the device.
        line: String,
        /// Why the payload was rejected.
        reason: String,
    },

    /// Appending to the durable log failed. The commit for this cycle is
    /// lost; the next complete reading cycle retries.
    #[error("log write failed: {0}")]
    LogWrite(#[from] csv::Error),

    /// Chart regeneration failed at some step (missing columns, empty result
    /// set, render or replace failure). Prior artifacts are left untouched.
    #[error("artifact regeneration failed: {0}")]
    ArtifactRegen(String),

    /// Configuration file could not be read or deserialized.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error outside the serial link and the CSV writer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
