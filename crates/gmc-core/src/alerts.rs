//! Debounced threshold alerts.
//!
//! Each [`AlertKind`] is tracked by an [`AlertCondition`], a small state
//! machine with three phases:
//!
//! ```text
//!            breach                 held >= duration
//! Inactive ─────────► Pending(since) ────────────────► Active
//!    ▲                    │                               │
//!    └──── resolves ──────┘                               │
//!    └───────────────────── resolves (Cleared) ───────────┘
//! ```
//!
//! A breach that resolves while pending resets the timer without emitting
//! anything. Entering `Active` emits one `Fired` event, leaving it emits one
//! `Cleared` event.
//!
//! Time is passed in explicitly so the engine stays a pure function of its
//! inputs.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use gmc_types::Reading;

use crate::events::{AlertEvent, AlertKind, AlertTransition};

/// Phase of an [`AlertCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPhase {
    /// No breach observed.
    Inactive,
    /// Breach observed continuously since the given instant.
    Pending {
        /// When the breach was first observed.
        since: Instant,
    },
    /// Alert has fired and not yet cleared.
    Active,
}

/// Debounce state for one alert kind.
#[derive(Debug, Clone)]
pub struct AlertCondition {
    kind: AlertKind,
    duration: Duration,
    phase: AlertPhase,
}

impl AlertCondition {
    /// Create an inactive condition that fires after `duration` of breach.
    pub fn new(kind: AlertKind, duration: Duration) -> Self {
        Self {
            kind,
            duration,
            phase: AlertPhase::Inactive,
        }
    }

    /// The kind tracked.
    pub fn kind(&self) -> AlertKind {
        self.kind
    }

    /// The current phase.
    pub fn phase(&self) -> AlertPhase {
        self.phase
    }

    /// Whether the alert has fired and not cleared.
    pub fn is_active(&self) -> bool {
        self.phase == AlertPhase::Active
    }

    /// Feed one observation. Returns the transition, if any.
    pub fn observe(&mut self, breached: bool, now: Instant) -> Option<AlertTransition> {
        self.observe_since(breached, now, now)
    }

    /// Like [`observe`](Self::observe), but a new breach counts from
    /// `since` instead of `now`. Fires at once if the hold has already
    /// elapsed.
    pub fn observe_since(
        &mut self,
        breached: bool,
        since: Instant,
        now: Instant,
    ) -> Option<AlertTransition> {
        match (self.phase, breached) {
            (AlertPhase::Inactive, true) => {
                if now.saturating_duration_since(since) >= self.duration {
                    self.phase = AlertPhase::Active;
                    return Some(AlertTransition::Fired);
                }
                self.phase = AlertPhase::Pending { since };
                None
            }
            (AlertPhase::Pending { since }, true) => {
                if now.saturating_duration_since(since) >= self.duration {
                    self.phase = AlertPhase::Active;
                    Some(AlertTransition::Fired)
                } else {
                    None
                }
            }
            (AlertPhase::Pending { .. }, false) => {
                self.phase = AlertPhase::Inactive;
                None
            }
            (AlertPhase::Active, false) => {
                self.phase = AlertPhase::Inactive;
                Some(AlertTransition::Cleared)
            }
            (AlertPhase::Active, true) | (AlertPhase::Inactive, false) => None,
        }
    }
}

/// Alert thresholds and hold durations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Dose rate above which the high-radiation alert breaches. `None`
    /// disables the alert.
    pub high_radiation_threshold_usvh: Option<f64>,
    /// How long the dose rate must stay high before firing.
    pub high_radiation_duration: Duration,
    /// Whether battery alerts are evaluated at all.
    pub enable_battery_alerts: bool,
    /// Voltage below which the low-battery alert breaches.
    pub low_battery_threshold_volts: f64,
    /// Voltage at or below which the critical-battery alert breaches.
    pub critical_battery_threshold_volts: f64,
    /// How long the battery must stay low before firing.
    pub low_battery_duration: Duration,
    /// How long the battery must stay critical before firing.
    pub critical_battery_duration: Duration,
    /// How long polls must keep failing before the device counts as offline.
    pub device_offline_duration: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            high_radiation_threshold_usvh: Some(0.5),
            high_radiation_duration: Duration::from_secs(2 * 60),
            enable_battery_alerts: true,
            low_battery_threshold_volts: 6.0,
            critical_battery_threshold_volts: 5.5,
            low_battery_duration: Duration::from_secs(5 * 60),
            critical_battery_duration: Duration::ZERO,
            device_offline_duration: Duration::from_secs(5 * 60),
        }
    }
}

/// Evaluates readings and poll outcomes against the alert thresholds.
#[derive(Debug, Clone)]
pub struct AlertEngine {
    config: AlertConfig,
    high_radiation: AlertCondition,
    low_battery: AlertCondition,
    critical_battery: AlertCondition,
    device_offline: AlertCondition,
    last_success: Option<Instant>,
}

impl AlertEngine {
    /// Create an engine with every condition inactive.
    pub fn new(config: AlertConfig) -> Self {
        Self {
            high_radiation: AlertCondition::new(
                AlertKind::HighRadiation,
                config.high_radiation_duration,
            ),
            low_battery: AlertCondition::new(AlertKind::LowBattery, config.low_battery_duration),
            critical_battery: AlertCondition::new(
                AlertKind::CriticalBattery,
                config.critical_battery_duration,
            ),
            device_offline: AlertCondition::new(
                AlertKind::DeviceOffline,
                config.device_offline_duration,
            ),
            last_success: None,
            config,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// The condition tracking `kind`.
    pub fn condition(&self, kind: AlertKind) -> &AlertCondition {
        match kind {
            AlertKind::HighRadiation => &self.high_radiation,
            AlertKind::LowBattery => &self.low_battery,
            AlertKind::CriticalBattery => &self.critical_battery,
            AlertKind::DeviceOffline => &self.device_offline,
        }
    }

    /// Kinds currently active.
    pub fn active(&self) -> Vec<AlertKind> {
        AlertKind::ALL
            .into_iter()
            .filter(|kind| self.condition(*kind).is_active())
            .collect()
    }

    /// Evaluate a successful poll.
    ///
    /// Also resolves the offline condition, since the device answered.
    pub fn observe_reading(&mut self, reading: &Reading, now: Instant) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        self.last_success = Some(now);

        if let Some(threshold) = self.config.high_radiation_threshold_usvh {
            let breached = reading.usv_h > threshold;
            if let Some(transition) = self.high_radiation.observe(breached, now) {
                events.push(self.event(
                    AlertKind::HighRadiation,
                    transition,
                    match transition {
                        AlertTransition::Fired => format!(
                            "High radiation: {:.3} µSv/h exceeds {:.3} µSv/h",
                            reading.usv_h, threshold
                        ),
                        AlertTransition::Cleared => {
                            format!("Radiation back to {:.3} µSv/h", reading.usv_h)
                        }
                    },
                ));
            }
        }

        if self.config.enable_battery_alerts {
            let volts = reading.battery_volts;

            let low = volts < self.config.low_battery_threshold_volts;
            if let Some(transition) = self.low_battery.observe(low, now) {
                events.push(self.event(
                    AlertKind::LowBattery,
                    transition,
                    match transition {
                        AlertTransition::Fired => format!(
                            "Low battery: {:.1} V below {:.1} V",
                            volts, self.config.low_battery_threshold_volts
                        ),
                        AlertTransition::Cleared => format!("Battery recovered: {:.1} V", volts),
                    },
                ));
            }

            let critical = volts <= self.config.critical_battery_threshold_volts;
            if let Some(transition) = self.critical_battery.observe(critical, now) {
                events.push(self.event(
                    AlertKind::CriticalBattery,
                    transition,
                    match transition {
                        AlertTransition::Fired => format!(
                            "Critical battery: {:.1} V at or below {:.1} V",
                            volts, self.config.critical_battery_threshold_volts
                        ),
                        AlertTransition::Cleared => {
                            format!("Battery above critical: {:.1} V", volts)
                        }
                    },
                ));
            }
        }

        if let Some(transition) = self.device_offline.observe(false, now) {
            events.push(self.event(
                AlertKind::DeviceOffline,
                transition,
                "Device responding again".to_string(),
            ));
        }

        events
    }

    /// Evaluate a failed poll. Only the offline condition is affected.
    ///
    /// The offline hold counts from the last successful poll, or from the
    /// first failure if the device has never answered.
    pub fn observe_poll_failure(&mut self, now: Instant) -> Vec<AlertEvent> {
        let minutes = self.config.device_offline_duration.as_secs() / 60;
        let since = self.last_success.unwrap_or(now);
        self.device_offline
            .observe_since(true, since, now)
            .map(|transition| {
                self.event(
                    AlertKind::DeviceOffline,
                    transition,
                    format!("Device not responding for {} min", minutes),
                )
            })
            .into_iter()
            .collect()
    }

    fn event(&self, kind: AlertKind, transition: AlertTransition, message: String) -> AlertEvent {
        match transition {
            AlertTransition::Fired => warn!("Alert fired: {}", message),
            AlertTransition::Cleared => info!("Alert cleared: {}", message),
        }
        AlertEvent {
            kind,
            transition,
            severity: kind.severity(),
            message,
            at: OffsetDateTime::now_utc(),
        }
    }
}
