//! Platform-agnostic types for GMC radiation detectors.
//!
//! This crate provides the data model shared by the device link, the data
//! logger, and the MQTT gateway, plus pure decoders for the GQ-RFC1201 reply
//! frames. It performs no I/O.
//!
//! # Example
//!
//! ```
//! use gmc_types::frames::decode_cpm;
//!
//! let cpm = decode_cpm(&[0x00, 0x23]).unwrap();
//! assert_eq!(cpm, 35);
//! ```

pub mod error;
pub mod frames;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{BatteryState, DeviceClock, RadiationLevel, RawSample, Reading};
