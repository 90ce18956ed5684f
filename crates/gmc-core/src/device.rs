//! GMC device connection and communication.
//!
//! This module provides the serial link to a GMC detector. A [`Device`] is a
//! request/response shim: it writes one command, waits up to the configured
//! timeout for the fixed-length reply, and decodes it. It never retries; the
//! caller decides what a failure means for the current cycle.
//!
//! The link is generic over its [`Port`] so that the framing logic can be
//! exercised over an in-memory duplex stream.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use time::{OffsetDateTime, PrimitiveDateTime};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, sleep, timeout_at};
use tokio_serial::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream,
    StopBits,
};
use tracing::{debug, info, warn};

use gmc_types::{ParseError, RawSample, frames};

use crate::commands;
use crate::error::{Error, Result};
use crate::traits::{DeviceConnector, GeigerDevice};

/// Baud rate of GMC-300E+ units on V4.xx firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Time the port is given to settle after opening.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// A byte stream a [`Device`] can talk over.
pub trait Port: AsyncRead + AsyncWrite + Unpin + Send {
    /// Drop any bytes received but not yet read.
    ///
    /// Called before every command so a late reply to a timed-out command is
    /// never taken for the next frame.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SerialStream {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

impl Port for tokio::io::DuplexStream {}

/// An open link to a GMC device.
///
/// # Note on Clone
///
/// This struct intentionally does not implement `Clone`. It owns the serial
/// port, and two owners issuing commands concurrently would interleave
/// frames.
pub struct Device<P: Port = SerialStream> {
    port: P,
    path: String,
    timeout: Duration,
    open: bool,
    last_success: Option<OffsetDateTime>,
}

impl<P: Port> std::fmt::Debug for Device<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .field("open", &self.open)
            .field("last_success", &self.last_success)
            .finish()
    }
}

impl Device<SerialStream> {
    /// Open the serial port at `path` (8N1, no flow control).
    ///
    /// Fails with [`Error::DeviceUnavailable`] if the port cannot be opened.
    pub async fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open_native_async()
            .map_err(|e| Error::unavailable(path, e.to_string()))?;

        sleep(SETTLE_DELAY).await;
        info!("Opened {} at {} baud", path, baud_rate);

        Ok(Self::from_port(port, path, timeout))
    }
}

impl<P: Port> Device<P> {
    /// Wrap an already-open port.
    pub fn from_port(port: P, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            port,
            path: path.into(),
            timeout,
            open: true,
            last_success: None,
        }
    }

    /// The per-command reply timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `command` and read exactly `expected` reply bytes.
    ///
    /// A reply that never starts is a [`Error::Timeout`]; one that stops
    /// part-way is a [`Error::Protocol`] short frame.
    async fn transact(&mut self, command: &[u8], expected: usize) -> Result<Vec<u8>> {
        let operation = commands::name(command);

        if !self.open {
            return Err(Error::unavailable(&self.path, "link is closed"));
        }
        if let Err(e) = self.port.discard_input() {
            return Err(self.link_lost(e));
        }

        let deadline = Instant::now() + self.timeout;

        let written = timeout_at(deadline, async {
            self.port.write_all(command).await?;
            self.port.flush().await
        })
        .await;
        match written {
            Err(_) => return Err(Error::timeout(operation, self.timeout)),
            Ok(Err(e)) => return Err(self.link_lost(e)),
            Ok(Ok(())) => {}
        }

        let mut buf = vec![0u8; expected];
        let mut filled = 0;
        while filled < expected {
            let read = timeout_at(deadline, self.port.read(&mut buf[filled..])).await;
            match read {
                Err(_) => break,
                Ok(Ok(0)) => {
                    return Err(self.link_lost(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "port closed",
                    )));
                }
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => return Err(self.link_lost(e)),
            }
        }

        match filled {
            0 => Err(Error::timeout(operation, self.timeout)),
            n if n < expected => Err(Error::protocol(
                operation,
                ParseError::InsufficientBytes {
                    expected,
                    actual: n,
                },
            )),
            _ => {
                debug!("{} -> {:02X?}", operation, buf);
                Ok(buf)
            }
        }
    }

    fn link_lost(&mut self, e: io::Error) -> Error {
        self.open = false;
        warn!("Lost link to {}: {}", self.path, e);
        Error::unavailable(&self.path, e.to_string())
    }

    fn mark_success(&mut self) {
        self.last_success = Some(OffsetDateTime::now_utc());
    }
}

#[async_trait]
impl<P: Port> GeigerDevice for Device<P> {
    fn port(&self) -> &str {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn last_success(&self) -> Option<OffsetDateTime> {
        self.last_success
    }

    async fn version(&mut self) -> Result<String> {
        let reply = self
            .transact(commands::GET_VERSION, frames::VERSION_FRAME_LEN)
            .await?;
        let version =
            frames::decode_version(&reply).map_err(|e| Error::protocol("GETVER", e))?;
        self.mark_success();
        Ok(version)
    }

    async fn poll(&mut self) -> Result<RawSample> {
        let reply = self
            .transact(commands::GET_CPM, frames::CPM_FRAME_LEN)
            .await?;
        let cpm = frames::decode_cpm(&reply).map_err(|e| Error::protocol("GETCPM", e))?;

        let reply = self
            .transact(commands::GET_VOLTAGE, frames::VOLTAGE_FRAME_LEN)
            .await?;
        let battery_volts =
            frames::decode_voltage(&reply).map_err(|e| Error::protocol("GETVOLT", e))?;

        self.mark_success();
        Ok(RawSample {
            cpm,
            battery_volts,
            captured_at: OffsetDateTime::now_utc(),
        })
    }

    async fn read_clock(&mut self) -> Result<PrimitiveDateTime> {
        let reply = self
            .transact(commands::GET_DATETIME, frames::DATETIME_FRAME_LEN)
            .await?;
        let clock =
            frames::decode_datetime(&reply).map_err(|e| Error::protocol("GETDATETIME", e))?;
        self.mark_success();
        Ok(clock)
    }

    async fn sync_clock(&mut self, now: PrimitiveDateTime) -> Result<()> {
        let command = commands::set_datetime(now);
        match self.transact(&command, frames::ACK_FRAME_LEN).await {
            Ok(reply) => {
                frames::decode_ack(&reply).map_err(|e| Error::SyncFailed(e.to_string()))?;
                self.mark_success();
                Ok(())
            }
            Err(e) if e.is_link_lost() => Err(e),
            Err(e) => Err(Error::SyncFailed(e.to_string())),
        }
    }

    async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.port.shutdown().await {
            debug!("Error closing {}: {}", self.path, e);
        }
        info!("Closed {}", self.path);
    }
}

/// Opens [`Device`] links on a serial port.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialConnector {
    /// Create a connector for `path`.
    pub fn new(path: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            timeout,
        }
    }
}

#[async_trait]
impl DeviceConnector for SerialConnector {
    type Device = Device<SerialStream>;

    fn target(&self) -> &str {
        &self.path
    }

    async fn open(&self) -> Result<Self::Device> {
        Device::open(&self.path, self.baud_rate, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use tokio::io::{DuplexStream, duplex};

    const TIMEOUT: Duration = Duration::from_secs(3);

    /// Plays the device side: for each step, reads the expected command and
    /// writes the canned reply.
    fn fake_device(mut end: DuplexStream, script: Vec<(Vec<u8>, Vec<u8>)>) {
        tokio::spawn(async move {
            for (command, reply) in script {
                let mut buf = vec![0u8; command.len()];
                if end.read_exact(&mut buf).await.is_err() {
                    return;
                }
                assert_eq!(buf, command, "unexpected command");
                if end.write_all(&reply).await.is_err() {
                    return;
                }
            }
            // Hold the line open without answering.
            std::future::pending::<()>().await;
        });
    }

    fn link(script: Vec<(Vec<u8>, Vec<u8>)>) -> Device<DuplexStream> {
        let (ours, theirs) = duplex(64);
        fake_device(theirs, script);
        Device::from_port(ours, "/dev/fake", TIMEOUT)
    }

    #[tokio::test]
    async fn test_poll_decodes_cpm_and_voltage() {
        let mut device = link(vec![
            (commands::GET_CPM.to_vec(), vec![0x00, 0x23]),
            (commands::GET_VOLTAGE.to_vec(), vec![81]),
        ]);

        assert!(device.last_success().is_none());
        let sample = device.poll().await.unwrap();
        assert_eq!(sample.cpm, 35);
        assert!((sample.battery_volts - 8.1).abs() < 1e-9);
        assert!(device.last_success().is_some());
        assert!(device.is_open());
    }

    #[tokio::test]
    async fn test_version() {
        let mut device = link(vec![(
            commands::GET_VERSION.to_vec(),
            b"GMC-300Re 4.54".to_vec(),
        )]);
        assert_eq!(device.version().await.unwrap(), "GMC-300Re 4.54");
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_times_out() {
        let mut device = link(vec![]);
        let err = device.poll().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { ref operation, .. } if operation == "GETCPM"));
        // A timeout does not close the link.
        assert!(device.is_open());
        assert!(device.last_success().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_frame_is_protocol_error() {
        let mut device = link(vec![(commands::GET_CPM.to_vec(), vec![0x01])]);
        let err = device.poll().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol {
                source: ParseError::InsufficientBytes {
                    expected: 2,
                    actual: 1
                },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unplugged_device_is_unavailable() {
        let (ours, theirs) = duplex(64);
        drop(theirs);
        let mut device = Device::from_port(ours, "/dev/fake", TIMEOUT);

        let err = device.poll().await.unwrap_err();
        assert!(err.is_link_lost());
        assert!(!device.is_open());

        // Subsequent commands fail fast.
        let err = device.poll().await.unwrap_err();
        assert!(matches!(err, Error::DeviceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_read_clock() {
        let mut device = link(vec![(
            commands::GET_DATETIME.to_vec(),
            vec![24, 5, 1, 13, 45, 9, frames::ACK],
        )]);
        assert_eq!(
            device.read_clock().await.unwrap(),
            datetime!(2024-05-01 13:45:09)
        );
    }

    #[tokio::test]
    async fn test_sync_clock_acknowledged() {
        let now = datetime!(2024-05-01 13:45:09);
        let mut device = link(vec![(commands::set_datetime(now), vec![frames::ACK])]);
        device.sync_clock(now).await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_clock_rejected() {
        let now = datetime!(2024-05-01 13:45:09);
        let mut device = link(vec![(commands::set_datetime(now), vec![0x00])]);
        let err = device.sync_clock(now).await.unwrap_err();
        assert!(matches!(err, Error::SyncFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_clock_unanswered() {
        let now = datetime!(2024-05-01 13:45:09);
        let mut device = link(vec![]);
        let err = device.sync_clock(now).await.unwrap_err();
        assert!(matches!(err, Error::SyncFailed(_)));
    }

    #[tokio::test]
    async fn test_close() {
        let mut device = link(vec![]);
        device.close().await;
        assert!(!device.is_open());
        assert!(matches!(
            device.poll().await,
            Err(Error::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn test_serial_connector_target() {
        let connector = SerialConnector::new("/dev/ttyUSB0", DEFAULT_BAUD_RATE, TIMEOUT);
        assert_eq!(connector.target(), "/dev/ttyUSB0");
    }
}
