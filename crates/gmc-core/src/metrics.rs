//! Unit conversion, battery and dose-rate classification, clock drift.
//!
//! Everything here is a pure function of its inputs.
//!
//! # Example
//!
//! ```
//! use gmc_core::metrics::{Metrics, MetricsConfig};
//! use gmc_types::{BatteryState, RadiationLevel, RawSample};
//!
//! let metrics = Metrics::new(MetricsConfig::default());
//! let sample = RawSample {
//!     cpm: 35,
//!     battery_volts: 8.0,
//!     captured_at: time::OffsetDateTime::UNIX_EPOCH,
//! };
//!
//! let reading = metrics.compute(&sample);
//! assert!((reading.usv_h - 0.1995).abs() < 1e-9);
//! assert_eq!(metrics.classify_radiation(reading.usv_h), RadiationLevel::Elevated);
//! assert_eq!(metrics.classify_battery(reading.battery_volts), BatteryState::Normal);
//! ```

use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;

use gmc_types::{BatteryState, RadiationLevel, RawSample, Reading};

/// Battery percentage at or above which the battery counts as full.
pub const FULL_BATTERY_PERCENT: u8 = 95;

/// Voltage thresholds for battery classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryThresholds {
    /// Below this voltage the battery is low.
    pub low_volts: f64,
    /// At or below this voltage the battery is critical.
    pub critical_volts: f64,
    /// Voltage of a fully charged battery (100 %).
    pub full_volts: f64,
    /// Voltage of an empty battery (0 %).
    pub empty_volts: f64,
}

impl Default for BatteryThresholds {
    fn default() -> Self {
        Self {
            low_volts: 6.0,
            critical_volts: 5.5,
            full_volts: 8.4,
            empty_volts: 6.0,
        }
    }
}

/// Lower bounds of the dose-rate bands, in µSv/h.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadiationBands {
    /// Start of the elevated band.
    pub elevated: f64,
    /// Start of the high band.
    pub high: f64,
    /// Start of the dangerous band.
    pub dangerous: f64,
}

impl Default for RadiationBands {
    fn default() -> Self {
        Self {
            elevated: 0.05,
            high: 0.2,
            dangerous: 1.0,
        }
    }
}

/// Configuration for [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Tube conversion factor; must be positive.
    pub cpm_to_usvh_factor: f64,
    /// Battery thresholds used for the displayed battery state.
    pub battery: BatteryThresholds,
    /// Dose-rate bands.
    pub radiation: RadiationBands,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            // SBM-20 tube as fitted to the GMC-300E+.
            cpm_to_usvh_factor: 0.0057,
            battery: BatteryThresholds::default(),
            radiation: RadiationBands::default(),
        }
    }
}

/// Converts raw samples into readings and classifies them.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    config: MetricsConfig,
}

impl Metrics {
    /// Create a new evaluator with the given configuration.
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Convert a raw sample into a reading: `usv_h = cpm × factor`.
    pub fn compute(&self, sample: &RawSample) -> Reading {
        Reading {
            cpm: sample.cpm,
            usv_h: f64::from(sample.cpm) * self.config.cpm_to_usvh_factor,
            battery_volts: sample.battery_volts,
            timestamp: sample.captured_at,
        }
    }

    /// Battery charge in percent, linear between the empty and full voltages.
    pub fn battery_percent(&self, volts: f64) -> u8 {
        let t = &self.config.battery;
        if volts >= t.full_volts {
            return 100;
        }
        if volts <= t.empty_volts {
            return 0;
        }
        let percent = (volts - t.empty_volts) / (t.full_volts - t.empty_volts) * 100.0;
        percent.clamp(0.0, 100.0) as u8
    }

    /// Classify the battery.
    ///
    /// Critical at or below the critical threshold, Low below the low
    /// threshold, Full from [`FULL_BATTERY_PERCENT`], Normal otherwise.
    pub fn classify_battery(&self, volts: f64) -> BatteryState {
        let t = &self.config.battery;
        if volts <= t.critical_volts {
            BatteryState::Critical
        } else if volts < t.low_volts {
            BatteryState::Low
        } else if self.battery_percent(volts) >= FULL_BATTERY_PERCENT {
            BatteryState::Full
        } else {
            BatteryState::Normal
        }
    }

    /// Classify a dose rate into its band.
    pub fn classify_radiation(&self, usv_h: f64) -> RadiationLevel {
        let bands = &self.config.radiation;
        if usv_h >= bands.dangerous {
            RadiationLevel::Dangerous
        } else if usv_h >= bands.high {
            RadiationLevel::High
        } else if usv_h >= bands.elevated {
            RadiationLevel::Elevated
        } else {
            RadiationLevel::Normal
        }
    }
}

/// Outcome of a clock drift check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftResult {
    /// The device clock is within the allowed drift.
    WithinBounds,
    /// The device clock is off by this many seconds (positive = ahead).
    Exceeded(i64),
}

/// Compare the device clock with the local clock.
///
/// Drift equal to `max_drift_seconds` is still within bounds.
pub fn check_drift(
    device_time: PrimitiveDateTime,
    local_time: PrimitiveDateTime,
    max_drift_seconds: u64,
) -> DriftResult {
    let drift = (device_time - local_time).whole_seconds();
    if drift.unsigned_abs() > max_drift_seconds {
        DriftResult::Exceeded(drift)
    } else {
        DriftResult::WithinBounds
    }
}
