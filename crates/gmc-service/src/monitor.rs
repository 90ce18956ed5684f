//! The poll loop.
//!
//! [`Monitor`] owns the device link and drives one cycle per update interval:
//! read the device, derive metrics, evaluate alerts, append to the CSV log
//! and hand the result to the MQTT gateway. A failed cycle never stops the
//! loop; a lost link is reopened on the next one.

use std::time::Duration;

use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gmc_core::{
    AlertEngine, AlertEvent, DeviceClock, DeviceConnector, DriftResult, Error, GeigerDevice,
    Metrics, Reading, Result, check_drift,
};
use gmc_store::{DataLogger, LogRecord};

use crate::config::Config;
use crate::mqtt::{Availability, GatewayHandle, StateSnapshot};

/// What startup clock handling did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOutcome {
    /// Neither drift checking nor syncing is enabled.
    Skipped,
    /// The device clock is within the allowed drift.
    InSync { drift: i64 },
    /// The device clock drifted but syncing is disabled.
    DriftWarned { drift: i64 },
    /// The device clock was set. `drift` is known when it was checked first.
    Synced { drift: Option<i64> },
    /// Reading or setting the clock failed; monitoring continues.
    Failed,
}

#[derive(Debug, Clone)]
struct ClockSettings {
    check_time_drift: bool,
    sync_datetime_on_start: bool,
    max_time_drift_seconds: u64,
}

/// Drives the device, alerts, data log and gateway.
pub struct Monitor<C: DeviceConnector> {
    connector: C,
    device: Option<C::Device>,
    interval: Duration,
    clock: ClockSettings,
    clock_outcome: Option<ClockOutcome>,
    local_offset: UtcOffset,
    metrics: Metrics,
    alerts: AlertEngine,
    logger: DataLogger,
    gateway: GatewayHandle,
    consecutive_failures: u32,
}

impl<C: DeviceConnector> Monitor<C> {
    /// Create a monitor. `local_offset` is the host's UTC offset, used for
    /// the device clock, which has no notion of time zones.
    pub fn new(
        connector: C,
        config: &Config,
        gateway: GatewayHandle,
        local_offset: UtcOffset,
    ) -> Self {
        Self {
            connector,
            device: None,
            interval: config.monitoring.update_interval(),
            clock: ClockSettings {
                check_time_drift: config.device.check_time_drift,
                sync_datetime_on_start: config.device.sync_datetime_on_start,
                max_time_drift_seconds: config.device.max_time_drift_seconds,
            },
            clock_outcome: None,
            local_offset,
            metrics: Metrics::new(config.metrics_config()),
            alerts: AlertEngine::new(config.alert_config()),
            logger: DataLogger::new(config.log_config()),
            gateway,
            consecutive_failures: 0,
        }
    }

    /// The open link, if any.
    pub fn device(&self) -> Option<&C::Device> {
        self.device.as_ref()
    }

    /// The alert engine.
    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    /// Result of clock handling on the first successful connection.
    pub fn clock_outcome(&self) -> Option<ClockOutcome> {
        self.clock_outcome
    }

    /// Polls failed in a row.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Return the open link, opening a new one if there is none or the old
    /// one was lost.
    ///
    /// The first link opened also gets its clock checked and synced.
    pub async fn connect(&mut self) -> Result<&mut C::Device> {
        match self.device.take() {
            Some(device) if device.is_open() => Ok(self.device.insert(device)),
            stale => {
                if let Some(mut device) = stale {
                    device.close().await;
                }
                let device = self.open_link().await?;
                Ok(self.device.insert(device))
            }
        }
    }

    async fn open_link(&mut self) -> Result<C::Device> {
        let mut device = self.connector.open().await?;
        info!("Connected to {}", self.connector.target());

        match device.version().await {
            Ok(version) => info!("Device version: {}", version),
            Err(e) if e.is_link_lost() => return Err(e),
            Err(e) => warn!("Failed to read device version: {}", e),
        }

        if self.clock_outcome.is_none() {
            let outcome = reconcile_clock(&mut device, &self.clock, self.local_offset).await?;
            self.clock_outcome = Some(outcome);
        }

        Ok(device)
    }

    /// Run one poll cycle.
    ///
    /// Side effects (alerts, log row, gateway state) are applied here; the
    /// returned result is informational.
    pub async fn run_cycle(&mut self) -> Result<Reading> {
        self.cycle(&CancellationToken::new()).await
    }

    /// One cycle whose device wait ends early when `cancel` fires.
    async fn cycle(&mut self, cancel: &CancellationToken) -> Result<Reading> {
        let now = Instant::now().into_std();
        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            polled = self.poll() => polled,
        };
        match polled {
            Err(Error::Cancelled) => {
                debug!("Poll interrupted by shutdown");
                Err(Error::Cancelled)
            }
            Ok(reading) => {
                self.on_reading(&reading, now);
                Ok(reading)
            }
            Err(e) => {
                self.on_failure(&e, now);
                Err(e)
            }
        }
    }

    async fn poll(&mut self) -> Result<Reading> {
        let device = self.connect().await?;
        let sample = device.poll().await;
        match sample {
            Ok(sample) => Ok(self.metrics.compute(&sample)),
            Err(e) => {
                if e.is_link_lost()
                    && let Some(mut device) = self.device.take()
                {
                    device.close().await;
                }
                Err(e)
            }
        }
    }

    fn on_reading(&mut self, reading: &Reading, now: std::time::Instant) {
        if self.consecutive_failures > 0 {
            info!(
                "Device {} recovered after {} failed polls",
                self.connector.target(),
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;

        let battery_level = self.metrics.battery_percent(reading.battery_volts);
        let battery_state = self.metrics.classify_battery(reading.battery_volts);
        let radiation_level = self.metrics.classify_radiation(reading.usv_h);
        debug!(
            "Reading: {} CPM, {:.4} µSv/h, {:.1} V ({})",
            reading.cpm, reading.usv_h, reading.battery_volts, battery_state
        );

        let events = self.alerts.observe_reading(reading, now);
        self.forward(events);

        let record = LogRecord::from_reading(reading, battery_level, battery_state);
        if let Err(e) = self.logger.append(&record) {
            warn!("Failed to write data log: {}", e);
        }

        self.gateway.set_availability(Availability::Online);
        self.gateway.publish_state(StateSnapshot {
            cpm: reading.cpm,
            usvh: reading.usv_h,
            battery_voltage: reading.battery_volts,
            battery_level,
            battery_state,
            radiation_level,
            timestamp: reading.timestamp,
        });
    }

    fn on_failure(&mut self, e: &Error, now: std::time::Instant) {
        self.consecutive_failures += 1;
        let target = self.connector.target();
        if self.consecutive_failures <= 3 {
            warn!(
                "Failed to poll {}: {} (attempt {})",
                target, e, self.consecutive_failures
            );
        } else if self.consecutive_failures == 4 {
            error!(
                "Failed to poll {} after {} attempts, will keep trying",
                target, self.consecutive_failures
            );
        } else {
            debug!("Failed to poll {}: {}", target, e);
        }

        let events = self.alerts.observe_poll_failure(now);
        self.forward(events);
        self.gateway.set_availability(Availability::Offline);
    }

    fn forward(&self, events: Vec<AlertEvent>) {
        for event in events {
            self.gateway.send_alert(event);
        }
    }

    /// Poll until `cancel` fires, then close the link.
    ///
    /// A device command still waiting for its reply is abandoned; log and
    /// gateway updates of the cycle are never interrupted.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Monitoring {} every {}s",
            self.connector.target(),
            self.interval.as_secs()
        );

        if let Err(e) = self.connect().await {
            warn!(
                "Device {} not available at startup: {}; will retry every cycle",
                self.connector.target(),
                e
            );
        }

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => match self.cycle(&cancel).await {
                    Ok(reading) => debug!("Cycle complete: {} CPM", reading.cpm),
                    Err(e) => debug!("Cycle ended: {}", e),
                },
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        info!("Stopping monitor");
        self.gateway.set_availability(Availability::Offline);
        if let Some(mut device) = self.device.take() {
            device.close().await;
            debug!("Closed {}", device.port());
        }
    }
}

/// Check and sync the device clock.
///
/// | check | sync | result                                    |
/// |-------|------|-------------------------------------------|
/// | off   | off  | nothing                                   |
/// | off   | on   | sync unconditionally                      |
/// | on    | off  | read, warn when drift exceeds the maximum |
/// | on    | on   | read, sync only when drift exceeds it     |
///
/// Only a lost link is returned as an error.
async fn reconcile_clock<D: GeigerDevice>(
    device: &mut D,
    settings: &ClockSettings,
    local_offset: UtcOffset,
) -> Result<ClockOutcome> {
    if !settings.check_time_drift && !settings.sync_datetime_on_start {
        return Ok(ClockOutcome::Skipped);
    }

    let mut drift = None;
    if settings.check_time_drift {
        let device_time = match device.read_clock().await {
            Ok(time) => time,
            Err(e) if e.is_link_lost() => return Err(e),
            Err(e) => {
                warn!("Failed to read device clock: {}", e);
                return Ok(ClockOutcome::Failed);
            }
        };
        let local_time = local_now(local_offset);
        let observed = DeviceClock::observe(device_time, local_time);
        debug!(
            "Device clock {} vs local {} ({}s)",
            observed.device_time, local_time, observed.observed_drift_seconds
        );

        match check_drift(device_time, local_time, settings.max_time_drift_seconds) {
            DriftResult::WithinBounds => {
                info!(
                    "Device clock is within {}s of local time",
                    settings.max_time_drift_seconds
                );
                return Ok(ClockOutcome::InSync {
                    drift: observed.observed_drift_seconds,
                });
            }
            DriftResult::Exceeded(seconds) if !settings.sync_datetime_on_start => {
                warn!(
                    "Device clock is off by {}s (max {}s); sync is disabled",
                    seconds, settings.max_time_drift_seconds
                );
                return Ok(ClockOutcome::DriftWarned { drift: seconds });
            }
            DriftResult::Exceeded(seconds) => {
                warn!("Device clock is off by {}s; syncing", seconds);
                drift = Some(seconds);
            }
        }
    }

    match device.sync_clock(local_now(local_offset)).await {
        Ok(()) => {
            info!("Device clock set to local time");
            Ok(ClockOutcome::Synced { drift })
        }
        Err(e) if e.is_link_lost() => Err(e),
        Err(e) => {
            warn!("Failed to set device clock: {}", e);
            Ok(ClockOutcome::Failed)
        }
    }
}

fn local_now(offset: UtcOffset) -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc().to_offset(offset);
    PrimitiveDateTime::new(now.date(), now.time())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gmc_core::{AlertKind, AlertTransition, MockConnector, MockDevice, MockFailure};
    use tempfile::TempDir;

    use crate::mqtt::{GatewayChannels, PublishGateway};

    struct Harness {
        monitor: Monitor<MockConnector>,
        connector: MockConnector,
        handle: GatewayHandle,
        channels: GatewayChannels,
        dir: TempDir,
    }

    fn harness(configure: impl FnOnce(&mut Config)) -> Harness {
        let dir = TempDir::new().unwrap();
        let mut config = Config::example();
        config.data_logging.csv_file = dir.path().join("gmc_data.csv");
        configure(&mut config);

        let connector = MockConnector::new(MockDevice::builder().cpm(20).build());
        let (handle, channels) = PublishGateway::channel();
        let monitor = Monitor::new(connector.clone(), &config, handle.clone(), UtcOffset::UTC);
        Harness {
            monitor,
            connector,
            handle,
            channels,
            dir,
        }
    }

    fn drain(channels: &mut GatewayChannels) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        while let Ok(event) = channels.alert_rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn host_now() -> PrimitiveDateTime {
        let now = OffsetDateTime::now_utc();
        PrimitiveDateTime::new(now.date(), now.time())
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_publishes_and_logs() {
        let mut h = harness(|_| {});

        let reading = h.monitor.run_cycle().await.unwrap();
        assert_eq!(reading.cpm, 20);
        assert!((reading.usv_h - 0.114).abs() < 1e-9);

        assert_eq!(h.handle.availability(), Availability::Online);
        let snapshot = h.channels.state_rx.borrow().clone().unwrap();
        assert_eq!(snapshot.cpm, 20);
        assert_eq!(snapshot.battery_level, 91);

        let log = std::fs::read_to_string(h.dir.path().join("gmc_data.csv")).unwrap();
        let lines: Vec<_> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("timestamp,cpm,usv_h"));
        assert!(lines[1].contains(",20,0.114,"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_alert_after_sustained_failures() {
        let mut h = harness(|_| {});
        let step = Duration::from_secs(60);
        h.monitor.run_cycle().await.unwrap();
        h.connector.device().set_failure(Some(MockFailure::Timeout));

        // Failures at 1..4 minutes after the last good reading.
        for _ in 0..4 {
            tokio::time::advance(step).await;
            assert!(h.monitor.run_cycle().await.is_err());
        }
        assert!(drain(&mut h.channels).is_empty());
        assert_eq!(h.handle.availability(), Availability::Offline);

        // Five minutes without a good reading.
        tokio::time::advance(step).await;
        assert!(h.monitor.run_cycle().await.is_err());
        let events = drain(&mut h.channels);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::DeviceOffline);
        assert_eq!(events[0].transition, AlertTransition::Fired);

        tokio::time::advance(step).await;
        assert!(h.monitor.run_cycle().await.is_err());
        assert!(drain(&mut h.channels).is_empty());
        assert_eq!(h.monitor.consecutive_failures(), 6);

        h.connector.device().set_failure(None);
        tokio::time::advance(step).await;
        h.monitor.run_cycle().await.unwrap();
        let events = drain(&mut h.channels);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::DeviceOffline);
        assert_eq!(events[0].transition, AlertTransition::Cleared);
        assert_eq!(h.monitor.consecutive_failures(), 0);
        assert_eq!(h.handle.availability(), Availability::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_spike_does_not_fire() {
        let mut h = harness(|_| {});
        let minute = Duration::from_secs(60);

        // 106 CPM is about 0.604 µSv/h
        h.connector.device().set_cpm(106);
        h.monitor.run_cycle().await.unwrap();
        tokio::time::advance(minute).await;
        h.monitor.run_cycle().await.unwrap();

        h.connector.device().set_cpm(50);
        tokio::time::advance(minute).await;
        h.monitor.run_cycle().await.unwrap();

        assert!(drain(&mut h.channels).is_empty());
        assert!(h.monitor.alerts().active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_radiation_fires_once() {
        let mut h = harness(|_| {});
        let minute = Duration::from_secs(60);

        h.connector.device().set_cpm(106);
        for _ in 0..5 {
            h.monitor.run_cycle().await.unwrap();
            tokio::time::advance(minute).await;
        }

        let events = drain(&mut h.channels);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::HighRadiation);
        assert!(events[0].is_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopens_lost_link() {
        let mut h = harness(|_| {});
        h.monitor.run_cycle().await.unwrap();
        assert_eq!(h.connector.open_count(), 1);

        h.connector.device().set_failure(Some(MockFailure::Unavailable));
        assert!(h.monitor.run_cycle().await.is_err());
        assert!(h.monitor.device().is_none());

        h.connector.device().set_failure(None);
        h.monitor.run_cycle().await.unwrap();
        assert_eq!(h.connector.open_count(), 2);
        assert!(h.monitor.device().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_open_counts_as_failure() {
        let mut h = harness(|_| {});
        h.connector.set_refuse(true);

        let err = h.monitor.run_cycle().await.unwrap_err();
        assert!(err.is_link_lost());
        assert_eq!(h.monitor.consecutive_failures(), 1);
        assert_eq!(h.connector.device().poll_count(), 0);

        h.connector.set_refuse(false);
        h.monitor.run_cycle().await.unwrap();
        assert_eq!(h.connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_in_sync_is_left_alone() {
        let mut h = harness(|_| {});
        h.monitor.connect().await.unwrap();

        assert!(matches!(
            h.monitor.clock_outcome(),
            Some(ClockOutcome::InSync { .. })
        ));
        assert_eq!(h.connector.device().sync_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_drift_is_synced() {
        let mut h = harness(|_| {});
        h.connector
            .device()
            .set_clock(host_now() - time::Duration::minutes(10));
        h.monitor.connect().await.unwrap();

        match h.monitor.clock_outcome() {
            Some(ClockOutcome::Synced { drift: Some(drift) }) => {
                assert!((-610..=-590).contains(&drift));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(h.connector.device().sync_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_drift_only_warned_without_sync() {
        let mut h = harness(|c| c.device.sync_datetime_on_start = false);
        h.connector
            .device()
            .set_clock(host_now() - time::Duration::minutes(10));
        h.monitor.connect().await.unwrap();

        assert!(matches!(
            h.monitor.clock_outcome(),
            Some(ClockOutcome::DriftWarned { .. })
        ));
        assert_eq!(h.connector.device().sync_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_synced_unconditionally_without_check() {
        let mut h = harness(|c| c.device.check_time_drift = false);
        h.monitor.connect().await.unwrap();

        assert_eq!(
            h.monitor.clock_outcome(),
            Some(ClockOutcome::Synced { drift: None })
        );
        assert_eq!(h.connector.device().sync_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_skipped_when_disabled() {
        let mut h = harness(|c| {
            c.device.check_time_drift = false;
            c.device.sync_datetime_on_start = false;
        });
        h.monitor.connect().await.unwrap();

        assert_eq!(h.monitor.clock_outcome(), Some(ClockOutcome::Skipped));
        assert_eq!(h.connector.device().sync_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_sync_does_not_stop_monitoring() {
        let mut h = harness(|c| c.device.check_time_drift = false);
        h.connector.device().set_reject_sync(true);

        h.monitor.run_cycle().await.unwrap();
        assert_eq!(h.monitor.clock_outcome(), Some(ClockOutcome::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_handled_once() {
        let mut h = harness(|c| c.device.check_time_drift = false);
        h.monitor.run_cycle().await.unwrap();

        h.connector.device().set_failure(Some(MockFailure::Unavailable));
        let _ = h.monitor.run_cycle().await;
        h.connector.device().set_failure(None);
        h.monitor.run_cycle().await.unwrap();

        assert_eq!(h.connector.open_count(), 2);
        assert_eq!(h.connector.device().sync_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let h = harness(|_| {});
        let cancel = CancellationToken::new();
        let task = tokio::spawn(h.monitor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(h.connector.device().poll_count() >= 2);
        assert!(!h.connector.device().is_open());
        assert_eq!(h.handle.availability(), Availability::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_keeps_polling_through_failed_cycles() {
        let h = harness(|_| {});
        h.connector.device().set_failure(Some(MockFailure::Timeout));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(h.monitor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(330)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(h.connector.device().poll_count(), 6);
        let mut channels = h.channels;
        let events = drain(&mut channels);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::DeviceOffline);
        assert_eq!(events[0].transition, AlertTransition::Fired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_slow_poll() {
        let h = harness(|_| {});
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let task = tokio::spawn(h.monitor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        h.connector.device().set_latency(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(64)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(80));
        assert_eq!(h.connector.device().poll_count(), 2);
        let mut channels = h.channels;
        assert!(drain(&mut channels).is_empty());
    }
}
