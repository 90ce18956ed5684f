//! Trait abstractions for GMC device operations.
//!
//! [`GeigerDevice`] abstracts over the real serial link and the
//! [`MockDevice`](crate::MockDevice) used in tests. [`DeviceConnector`]
//! abstracts over how a link is opened, so a long-running monitor can reopen
//! it after the device is unplugged.

use async_trait::async_trait;
use time::{OffsetDateTime, PrimitiveDateTime};

use gmc_types::RawSample;

use crate::error::Result;

/// Request/response operations on an open device link.
///
/// Methods take `&mut self`: a link has exactly one owner, the poll loop,
/// and two commands are never in flight at once.
///
/// # Example
///
/// ```ignore
/// use gmc_core::{GeigerDevice, Result};
///
/// async fn print_cpm<D: GeigerDevice>(device: &mut D) -> Result<()> {
///     let sample = device.poll().await?;
///     println!("{} CPM", sample.cpm);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait GeigerDevice: Send {
    /// The port or identifier this link was opened on.
    fn port(&self) -> &str;

    /// Whether the link is still usable.
    ///
    /// Becomes `false` after [`close`](Self::close) or once a command found
    /// the link gone.
    fn is_open(&self) -> bool;

    /// When the last command completed successfully.
    fn last_success(&self) -> Option<OffsetDateTime>;

    /// Read the model and firmware string.
    async fn version(&mut self) -> Result<String>;

    /// Read one raw sample (counts per minute and battery voltage).
    async fn poll(&mut self) -> Result<RawSample>;

    /// Read the device's real-time clock.
    async fn read_clock(&mut self) -> Result<PrimitiveDateTime>;

    /// Set the device's real-time clock.
    async fn sync_clock(&mut self, now: PrimitiveDateTime) -> Result<()>;

    /// Close the link. Further commands fail with `DeviceUnavailable`.
    async fn close(&mut self);
}

/// Opens device links.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// The link type produced.
    type Device: GeigerDevice;

    /// Describe the target, e.g. the serial port path.
    fn target(&self) -> &str;

    /// Open a new link.
    async fn open(&self) -> Result<Self::Device>;
}
