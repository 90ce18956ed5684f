//! Local data log for GMC radiation detector readings.
//!
//! This crate appends readings to a size-bounded CSV file, rotating it into
//! timestamped archives when full, and exports the whole log (or a time range
//! of it) into a single CSV on demand.
//!
//! # Example
//!
//! ```no_run
//! use gmc_store::{DataLogger, LogConfig};
//!
//! let logger = DataLogger::new(LogConfig::default());
//! let summary = logger.export("export.csv".as_ref(), None, None)?;
//! println!("{} rows exported", summary.rows);
//! # Ok::<(), gmc_store::Error>(())
//! ```

mod error;
mod logger;
mod models;

pub use error::{Error, Result};
pub use logger::{DataLogger, ExportSummary, LogConfig};
pub use models::{COLUMNS, LogRecord};
