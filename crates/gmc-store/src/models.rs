//! Rows of the data log.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use gmc_types::{BatteryState, Reading};

/// Column names of the data log, in row order.
pub const COLUMNS: [&str; 6] = [
    "timestamp",
    "cpm",
    "usv_h",
    "battery_volts",
    "battery_percent",
    "battery_state",
];

/// One row of the data log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// When the reading was captured.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Counts per minute.
    pub cpm: u32,
    /// Dose rate in µSv/h.
    pub usv_h: f64,
    /// Battery voltage in volts.
    pub battery_volts: f64,
    /// Battery charge in percent.
    pub battery_percent: u8,
    /// Battery classification.
    pub battery_state: BatteryState,
}

impl LogRecord {
    /// Create a record from a reading and its battery classification.
    ///
    /// The dose rate is rounded to four decimals and the voltage to one, the
    /// resolution the device reports at.
    pub fn from_reading(reading: &Reading, battery_percent: u8, battery_state: BatteryState) -> Self {
        Self {
            timestamp: reading.timestamp,
            cpm: reading.cpm,
            usv_h: round_to(reading.usv_h, 4),
            battery_volts: round_to(reading.battery_volts, 1),
            battery_percent,
            battery_state,
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
