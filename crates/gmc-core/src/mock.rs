//! Mock device implementation for testing.
//!
//! This module provides a mock device that can be used for unit testing
//! without a detector on a serial port.
//!
//! [`MockDevice`] implements [`GeigerDevice`] and is cheap to clone: all
//! clones share state, so a test can keep a handle and change readings or
//! inject failures while a monitor owns another clone.
//!
//! # Features
//!
//! - **Failure injection**: unplugged link, timeouts, malformed frames
//! - **Latency simulation**: delay every command
//! - **Clock simulation**: a device clock with configurable drift

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use time::{OffsetDateTime, PrimitiveDateTime};

use gmc_types::{ParseError, RawSample};

use crate::error::{Error, Result};
use crate::traits::{DeviceConnector, GeigerDevice};

/// The kind of failure a [`MockDevice`] should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// The link is gone (unplugged).
    Unavailable,
    /// The device does not answer.
    Timeout,
    /// The device answers with a short frame.
    Malformed,
}

#[derive(Debug)]
struct MockState {
    port: String,
    cpm: AtomicU32,
    battery_volts: Mutex<f64>,
    clock: Mutex<PrimitiveDateTime>,
    open: AtomicBool,
    last_success: Mutex<Option<OffsetDateTime>>,
    failure: Mutex<Option<MockFailure>>,
    /// Number of polls still to fail before succeeding.
    remaining_failures: AtomicU32,
    reject_sync: AtomicBool,
    latency: Mutex<Duration>,
    poll_count: AtomicU32,
    sync_count: AtomicU32,
}

/// A mock GMC device for testing.
///
/// # Example
///
/// ```
/// use gmc_core::{GeigerDevice, MockDevice};
///
/// #[tokio::main]
/// async fn main() {
///     let mut device = MockDevice::builder().cpm(35).battery_volts(8.1).build();
///     let sample = device.poll().await.unwrap();
///     assert_eq!(sample.cpm, 35);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Arc<MockState>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MockDevice {
    /// Start building a mock device.
    pub fn builder() -> MockDeviceBuilder {
        MockDeviceBuilder::default()
    }

    /// Set the counts per minute returned by subsequent polls.
    pub fn set_cpm(&self, cpm: u32) {
        self.state.cpm.store(cpm, Ordering::SeqCst);
    }

    /// Set the battery voltage returned by subsequent polls.
    pub fn set_battery_volts(&self, volts: f64) {
        *lock(&self.state.battery_volts) = volts;
    }

    /// Set the device clock.
    pub fn set_clock(&self, clock: PrimitiveDateTime) {
        *lock(&self.state.clock) = clock;
    }

    /// Current device clock.
    pub fn clock(&self) -> PrimitiveDateTime {
        *lock(&self.state.clock)
    }

    /// Make every command fail with `failure` until cleared with `None`.
    pub fn set_failure(&self, failure: Option<MockFailure>) {
        *lock(&self.state.failure) = failure;
    }

    /// Fail the next `count` polls with the configured failure (or
    /// `Timeout` if none is set), then succeed.
    pub fn fail_next(&self, count: u32) {
        self.state.remaining_failures.store(count, Ordering::SeqCst);
    }

    /// Make set-time commands go unacknowledged.
    pub fn set_reject_sync(&self, reject: bool) {
        self.state.reject_sync.store(reject, Ordering::SeqCst);
    }

    /// Delay every command by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.state.latency) = latency;
    }

    /// Number of polls attempted.
    pub fn poll_count(&self) -> u32 {
        self.state.poll_count.load(Ordering::SeqCst)
    }

    /// Number of acknowledged clock syncs.
    pub fn sync_count(&self) -> u32 {
        self.state.sync_count.load(Ordering::SeqCst)
    }

    /// Reopen the link after it was closed or lost.
    pub fn reopen(&self) {
        self.state.open.store(true, Ordering::SeqCst);
    }

    async fn simulate(&self, operation: &str) -> Result<()> {
        let latency = *lock(&self.state.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if !self.state.open.load(Ordering::SeqCst) {
            return Err(Error::unavailable(&self.state.port, "link is closed"));
        }

        let configured = *lock(&self.state.failure);
        let transient = self
            .state
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let failure = match (configured, transient) {
            (Some(failure), _) => Some(failure),
            (None, true) => Some(MockFailure::Timeout),
            (None, false) => None,
        };

        match failure {
            None => Ok(()),
            Some(MockFailure::Unavailable) => {
                self.state.open.store(false, Ordering::SeqCst);
                Err(Error::unavailable(&self.state.port, "mock device unplugged"))
            }
            Some(MockFailure::Timeout) => Err(Error::timeout(operation, Duration::from_secs(3))),
            Some(MockFailure::Malformed) => Err(Error::protocol(
                operation,
                ParseError::InsufficientBytes {
                    expected: 2,
                    actual: 1,
                },
            )),
        }
    }

    fn mark_success(&self) {
        *lock(&self.state.last_success) = Some(OffsetDateTime::now_utc());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl GeigerDevice for MockDevice {
    fn port(&self) -> &str {
        &self.state.port
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    fn last_success(&self) -> Option<OffsetDateTime> {
        *lock(&self.state.last_success)
    }

    async fn version(&mut self) -> Result<String> {
        self.simulate("GETVER").await?;
        self.mark_success();
        Ok("GMC-300Re 4.54".to_string())
    }

    async fn poll(&mut self) -> Result<RawSample> {
        self.state.poll_count.fetch_add(1, Ordering::SeqCst);
        self.simulate("GETCPM").await?;
        self.mark_success();
        Ok(RawSample {
            cpm: self.state.cpm.load(Ordering::SeqCst),
            battery_volts: *lock(&self.state.battery_volts),
            captured_at: OffsetDateTime::now_utc(),
        })
    }

    async fn read_clock(&mut self) -> Result<PrimitiveDateTime> {
        self.simulate("GETDATETIME").await?;
        self.mark_success();
        Ok(self.clock())
    }

    async fn sync_clock(&mut self, now: PrimitiveDateTime) -> Result<()> {
        match self.simulate("SETDATETIME").await {
            Err(e) if e.is_link_lost() => return Err(e),
            Err(e) => return Err(Error::SyncFailed(e.to_string())),
            Ok(()) => {}
        }
        if self.state.reject_sync.load(Ordering::SeqCst) {
            return Err(Error::SyncFailed("device returned 0x00".to_string()));
        }
        self.set_clock(now);
        self.state.sync_count.fetch_add(1, Ordering::SeqCst);
        self.mark_success();
        Ok(())
    }

    async fn close(&mut self) {
        self.state.open.store(false, Ordering::SeqCst);
    }
}

/// Builder for [`MockDevice`].
#[derive(Debug, Clone)]
pub struct MockDeviceBuilder {
    port: String,
    cpm: u32,
    battery_volts: f64,
    clock: PrimitiveDateTime,
    failure: Option<MockFailure>,
}

impl Default for MockDeviceBuilder {
    fn default() -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            port: "/dev/mock".to_string(),
            cpm: 20,
            battery_volts: 8.2,
            clock: PrimitiveDateTime::new(now.date(), now.time()),
            failure: None,
        }
    }
}

impl MockDeviceBuilder {
    /// Set the port name.
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    /// Set the counts per minute.
    pub fn cpm(mut self, cpm: u32) -> Self {
        self.cpm = cpm;
        self
    }

    /// Set the battery voltage.
    pub fn battery_volts(mut self, volts: f64) -> Self {
        self.battery_volts = volts;
        self
    }

    /// Set the device clock.
    pub fn clock(mut self, clock: PrimitiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    /// Start with a persistent failure.
    pub fn failure(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Build the device (opened).
    pub fn build(self) -> MockDevice {
        MockDevice {
            state: Arc::new(MockState {
                port: self.port,
                cpm: AtomicU32::new(self.cpm),
                battery_volts: Mutex::new(self.battery_volts),
                clock: Mutex::new(self.clock),
                open: AtomicBool::new(true),
                last_success: Mutex::new(None),
                failure: Mutex::new(self.failure),
                remaining_failures: AtomicU32::new(0),
                reject_sync: AtomicBool::new(false),
                latency: Mutex::new(Duration::ZERO),
                poll_count: AtomicU32::new(0),
                sync_count: AtomicU32::new(0),
            }),
        }
    }
}

/// A [`DeviceConnector`] handing out clones of one [`MockDevice`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    device: MockDevice,
    refuse: Arc<AtomicBool>,
    open_count: Arc<AtomicU32>,
}

impl MockConnector {
    /// Create a connector for `device`.
    pub fn new(device: MockDevice) -> Self {
        Self {
            device,
            refuse: Arc::new(AtomicBool::new(false)),
            open_count: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Make subsequent opens fail as if the port did not exist.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::SeqCst)
    }

    /// The shared device handle.
    pub fn device(&self) -> &MockDevice {
        &self.device
    }
}

#[async_trait]
impl DeviceConnector for MockConnector {
    type Device = MockDevice;

    fn target(&self) -> &str {
        self.device.port()
    }

    async fn open(&self) -> Result<MockDevice> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::unavailable(self.device.port(), "No such file or directory"));
        }
        self.device.reopen();
        self.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.device.clone())
    }
}
