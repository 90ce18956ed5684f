//! Integration tests for gmc-core
//!
//! The hardware tests need a GMC-300E+ on a serial port and should be run with:
//! `cargo test --package gmc-core -- --ignored --nocapture`
//!
//! Set the GMC_PORT environment variable to pick the port:
//! `GMC_PORT=/dev/ttyUSB1 cargo test --package gmc-core -- --ignored`
//!
//! If not set, tests use `/dev/ttyUSB0`.

use std::env;
use std::time::Duration;

use gmc_core::{
    AlertConfig, AlertEngine, AlertKind, DEFAULT_BAUD_RATE, Device, GeigerDevice, Metrics,
    MockDevice, MockFailure,
};

const LINK_TIMEOUT: Duration = Duration::from_secs(3);

fn get_port() -> String {
    env::var("GMC_PORT").unwrap_or_else(|_| "/dev/ttyUSB0".to_string())
}

#[tokio::test]
#[ignore = "requires GMC hardware"]
async fn test_open_and_poll() {
    let port = get_port();
    let mut device = match Device::open(&port, DEFAULT_BAUD_RATE, LINK_TIMEOUT).await {
        Ok(d) => d,
        Err(e) => panic!("Failed to open {}: {}", port, e),
    };

    let version = device.version().await.expect("version");
    println!("Version: {}", version);
    assert!(version.starts_with("GMC"));

    let sample = device.poll().await.expect("poll");
    println!("{} CPM, {:.1} V", sample.cpm, sample.battery_volts);
    assert!(sample.battery_volts > 0.0 && sample.battery_volts < 20.0);

    device.close().await;
    assert!(!device.is_open());
}

#[tokio::test]
#[ignore = "requires GMC hardware"]
async fn test_read_clock() {
    let port = get_port();
    let mut device = Device::open(&port, DEFAULT_BAUD_RATE, LINK_TIMEOUT)
        .await
        .expect("open");

    let clock = device.read_clock().await.expect("read clock");
    println!("Device clock: {}", clock);
    device.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_mock_pipeline_raises_and_clears_alerts() {
    let mut device = MockDevice::builder().cpm(20).battery_volts(5.4).build();
    let metrics = Metrics::default();
    let mut alerts = AlertEngine::new(AlertConfig::default());

    let reading = metrics.compute(&device.poll().await.unwrap());
    let now = tokio::time::Instant::now().into_std();
    let events = alerts.observe_reading(&reading, now);

    // 5.4 V is below the critical threshold, which has no hold time.
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AlertKind::CriticalBattery);
    assert!(events[0].is_fired());

    device.set_battery_volts(8.2);
    tokio::time::advance(Duration::from_secs(60)).await;
    let reading = metrics.compute(&device.poll().await.unwrap());
    let events = alerts.observe_reading(&reading, tokio::time::Instant::now().into_std());
    assert!(events.iter().any(|e| e.kind == AlertKind::CriticalBattery && !e.is_fired()));
    assert!(alerts.active().is_empty());
}

#[tokio::test]
async fn test_mock_unplug_closes_link() {
    let mut device = MockDevice::builder()
        .failure(MockFailure::Unavailable)
        .build();

    let err = device.poll().await.unwrap_err();
    assert!(err.is_link_lost());
    assert!(!device.is_open());
}
