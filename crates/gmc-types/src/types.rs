//! Core types for GMC radiation detector data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, PrimitiveDateTime};

/// One successful poll of the device, before unit conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawSample {
    /// Counts per minute as reported by the tube.
    pub cpm: u32,
    /// Battery voltage in volts.
    pub battery_volts: f64,
    /// When the sample was taken (UTC).
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub captured_at: OffsetDateTime,
}

/// A converted reading, one per poll cycle.
///
/// Readings are immutable once produced; see `gmc_core::metrics::compute`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Counts per minute.
    pub cpm: u32,
    /// Dose rate in microsieverts per hour.
    pub usv_h: f64,
    /// Battery voltage in volts.
    pub battery_volts: f64,
    /// When the underlying sample was taken (UTC).
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

/// Battery condition derived from voltage.
///
/// Variants are ordered from most to least severe, so `Critical < Full`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BatteryState {
    /// At or below the critical threshold.
    Critical,
    /// Below the low-battery threshold.
    Low,
    /// Healthy.
    Normal,
    /// Close to the full-charge voltage.
    Full,
}

impl BatteryState {
    /// Whether this state should raise a battery alert.
    #[must_use]
    pub fn is_alerting(self) -> bool {
        matches!(self, BatteryState::Low | BatteryState::Critical)
    }

    /// Label used in payloads and log rows.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BatteryState::Critical => "Critical",
            BatteryState::Low => "Low",
            BatteryState::Normal => "Normal",
            BatteryState::Full => "Full",
        }
    }
}

impl fmt::Display for BatteryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for BatteryState {
    type Err = crate::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Critical" => Ok(BatteryState::Critical),
            "Low" => Ok(BatteryState::Low),
            "Normal" => Ok(BatteryState::Normal),
            "Full" => Ok(BatteryState::Full),
            other => Err(crate::ParseError::InvalidData(format!(
                "unknown battery state '{other}'"
            ))),
        }
    }
}

/// Dose-rate band used for the status entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RadiationLevel {
    /// Below the elevated band.
    Normal,
    /// Elevated but below the high band.
    Elevated,
    /// High but below the dangerous band.
    High,
    /// At or above the dangerous band.
    Dangerous,
}

impl RadiationLevel {
    /// Label used in payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RadiationLevel::Normal => "Normal",
            RadiationLevel::Elevated => "Elevated",
            RadiationLevel::High => "High",
            RadiationLevel::Dangerous => "Dangerous",
        }
    }
}

impl fmt::Display for RadiationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The device's real-time clock as observed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceClock {
    /// Wall-clock time reported by the device (device local time, no offset).
    pub device_time: PrimitiveDateTime,
    /// `device_time - local_time`, in whole seconds.
    pub observed_drift_seconds: i64,
}

impl DeviceClock {
    /// Build a clock observation against the host's local wall-clock time.
    #[must_use]
    pub fn observe(device_time: PrimitiveDateTime, local_time: PrimitiveDateTime) -> Self {
        Self {
            device_time,
            observed_drift_seconds: (device_time - local_time).whole_seconds(),
        }
    }
}
