//! Alert events emitted by the [`AlertEngine`](crate::AlertEngine).
//!
//! Events are serializable so the MQTT gateway can forward them verbatim.

use core::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::mpsc;

/// The conditions the alert engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Dose rate above the configured threshold.
    HighRadiation,
    /// Battery below the low threshold.
    LowBattery,
    /// Battery at or below the critical threshold.
    CriticalBattery,
    /// No successful poll for the configured duration.
    DeviceOffline,
}

impl AlertKind {
    /// All kinds, in evaluation order.
    pub const ALL: [AlertKind; 4] = [
        AlertKind::HighRadiation,
        AlertKind::LowBattery,
        AlertKind::CriticalBattery,
        AlertKind::DeviceOffline,
    ];

    /// Stable identifier used in topics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::HighRadiation => "high_radiation",
            AlertKind::LowBattery => "low_battery",
            AlertKind::CriticalBattery => "critical_battery",
            AlertKind::DeviceOffline => "device_offline",
        }
    }

    /// Severity of this kind when it fires.
    pub fn severity(self) -> AlertSeverity {
        match self {
            AlertKind::CriticalBattery => AlertSeverity::Critical,
            AlertKind::HighRadiation | AlertKind::LowBattery | AlertKind::DeviceOffline => {
                AlertSeverity::Warning
            }
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Needs attention.
    Warning,
    /// Needs attention now.
    Critical,
}

/// Direction of an alert transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertTransition {
    /// The condition became active.
    Fired,
    /// The condition cleared.
    Cleared,
}

/// One alert transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Which condition changed.
    pub kind: AlertKind,
    /// Fired or cleared.
    pub transition: AlertTransition,
    /// Severity of the condition.
    pub severity: AlertSeverity,
    /// Human-readable description.
    pub message: String,
    /// When the transition happened.
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl AlertEvent {
    /// Whether this event fires an alert.
    pub fn is_fired(&self) -> bool {
        self.transition == AlertTransition::Fired
    }
}

/// Sender half of the alert event stream.
pub type AlertSender = mpsc::Sender<AlertEvent>;

/// Receiver half of the alert event stream.
pub type AlertReceiver = mpsc::Receiver<AlertEvent>;

/// Create a bounded alert event channel.
pub fn alert_channel(capacity: usize) -> (AlertSender, AlertReceiver) {
    mpsc::channel(capacity)
}
