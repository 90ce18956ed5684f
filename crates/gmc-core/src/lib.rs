//! Core library for GQ Electronics GMC radiation detectors.
//!
//! This crate talks to a GMC-300E+ (and compatible units) over USB serial
//! using the GQ-RFC1201 command protocol, turns raw counts into dose rates,
//! and tracks debounced threshold alerts.
//!
//! # Features
//!
//! - **Device link**: version, counts per minute, battery voltage, clock
//! - **Metrics**: µSv/h conversion, battery and dose-rate classification
//! - **Alerts**: high radiation, low/critical battery, device offline
//! - **Mock device**: failure injection for tests without hardware
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use gmc_core::{Device, GeigerDevice, Metrics, DEFAULT_BAUD_RATE};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut device =
//!         Device::open("/dev/ttyUSB0", DEFAULT_BAUD_RATE, Duration::from_secs(3)).await?;
//!     println!("Firmware: {}", device.version().await?);
//!
//!     let reading = Metrics::default().compute(&device.poll().await?);
//!     println!("{} CPM, {:.3} µSv/h", reading.cpm, reading.usv_h);
//!
//!     device.close().await;
//!     Ok(())
//! }
//! ```

pub mod alerts;
pub mod commands;
pub mod device;
pub mod error;
pub mod events;
pub mod metrics;
pub mod mock;
pub mod reconnect;
pub mod traits;

pub use alerts::{AlertCondition, AlertConfig, AlertEngine, AlertPhase};
pub use device::{DEFAULT_BAUD_RATE, Device, Port, SerialConnector};
pub use error::{Error, Result};
pub use events::{
    AlertEvent, AlertKind, AlertReceiver, AlertSender, AlertSeverity, AlertTransition,
    alert_channel,
};
pub use metrics::{
    BatteryThresholds, DriftResult, FULL_BATTERY_PERCENT, Metrics, MetricsConfig, RadiationBands,
    check_drift,
};
pub use mock::{MockConnector, MockDevice, MockDeviceBuilder, MockFailure};
pub use reconnect::ReconnectOptions;
pub use traits::{DeviceConnector, GeigerDevice};

// Re-export types from gmc-types
pub use gmc_types::{
    BatteryState, DeviceClock, ParseError, RadiationLevel, RawSample, Reading,
};
