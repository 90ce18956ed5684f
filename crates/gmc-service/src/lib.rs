//! Monitoring daemon for GMC radiation detectors.
//!
//! This crate provides the `gmc-monitor` service, which:
//! - Polls a GMC-300E+ over USB serial on a fixed interval
//! - Converts counts to dose rate and classifies battery and radiation level
//! - Raises debounced alerts for high radiation, low battery and a lost device
//! - Appends every reading to a size-rotated CSV log
//! - Publishes state, alerts and Home Assistant discovery over MQTT
//!
//! # Configuration
//!
//! The service reads `gmc_config.json`:
//!
//! ```json
//! {
//!   "device": { "port": "/dev/ttyUSB0", "cpm_to_usvh_factor": 0.0057 },
//!   "mqtt": { "broker": "localhost", "topic_prefix": "homeassistant/sensor/gmc300e" },
//!   "monitoring": { "update_interval_seconds": 60 },
//!   "alerts": { "high_radiation_threshold_usvh": 0.5 }
//! }
//! ```
//!
//! `gmc-monitor init-config` writes a complete example.

pub mod config;
pub mod logging;
pub mod monitor;
pub mod mqtt;

pub use config::{Config, ConfigError, ValidationError, default_config_path};
pub use monitor::{ClockOutcome, Monitor};
pub use mqtt::{Availability, GatewayError, GatewayHandle, GatewayTask, PublishGateway};
