//! Serial line classification.
//!
//! The station firmware emits newline-terminated ASCII, one of six shapes:
//!
//! ```text
//! Soil Moisture:<int>
//! Temp:<float>
//! Hum:<float>
//! PUMP:TRIGGERED
//! PUMP:START
//! PUMP:STOP
//! ```
//!
//! Anything else (boot banners, debug prints) classifies as
//! [`ParsedLine::Unknown`] and is silently discarded by the caller. A
//! recognized prefix with a non-numeric payload is a
//! [`MalformedReading`](crate::error::StationError::MalformedReading) — the
//! line is skipped, the loop keeps running.

use crate::error::{Result, StationError};

/// Prefixes of the three reading lines.
const SOIL_PREFIX: &str = "Soil Moisture:";
const TEMP_PREFIX: &str = "Temp:";
const HUM_PREFIX: &str = "Hum:";

/// One classified line from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// Raw soil moisture reading (ADC counts).
    SoilMoisture(i64),
    /// Air temperature in degrees Celsius.
    Temperature(f64),
    /// Relative humidity in percent.
    Humidity(f64),
    /// Pump state transition, logged immediately.
    Pump(PumpEvent),
    /// Diagnostic or otherwise unrecognized output. Not an error.
    Unknown,
}

/// Pump state transitions reported by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEvent {
    /// Moisture threshold crossed, watering requested.
    Triggered,
    /// Pump relay switched on.
    Started,
    /// Pump relay switched off.
    Stopped,
}

impl PumpEvent {
    /// Label recorded in the log's Event column.
    pub fn label(&self) -> &'static str {
        match self {
            PumpEvent::Triggered => "Pump Triggered",
            PumpEvent::Started => "Pump Started",
            PumpEvent::Stopped => "Pump Stopped",
        }
    }
}

/// Classify one raw line from the serial link.
pub fn parse_line(raw: &str) -> Result<ParsedLine> {
    let line = raw.trim();

    if let Some(payload) = line.strip_prefix(SOIL_PREFIX) {
        let value = payload.trim().parse::<i64>().map_err(|e| {
            StationError::MalformedReading {
                line: line.to_string(),
                reason: e.to_string(),
            }
        })?;
        return Ok(ParsedLine::SoilMoisture(value));
    }

    if let Some(payload) = line.strip_prefix(TEMP_PREFIX) {
        return parse_float(payload, line).map(ParsedLine::Temperature);
    }

    if let Some(payload) = line.strip_prefix(HUM_PREFIX) {
        return parse_float(payload, line).map(ParsedLine::Humidity);
    }

    Ok(match line {
        "PUMP:TRIGGERED" => ParsedLine::Pump(PumpEvent::Triggered),
        "PUMP:START" => ParsedLine::Pump(PumpEvent::Started),
        "PUMP:STOP" => ParsedLine::Pump(PumpEvent::Stopped),
        _ => ParsedLine::Unknown,
    })
}

fn parse_float(payload: &str, line: &str) -> Result<f64> {
    payload
        .trim()
        .parse::<f64>()
        .map_err(|e| StationError::MalformedReading {
            line: line.to_string(),
            reason: e.to_string(),
        })
}
