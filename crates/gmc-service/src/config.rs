//! Monitor configuration.
//!
//! The configuration is a JSON document with one object per section. The
//! `device` and `mqtt` sections are required, as are `device.port`,
//! `device.cpm_to_usvh_factor` and `mqtt.broker`; everything else has a
//! default.
//!
//! ```json
//! {
//!   "device": { "port": "/dev/ttyUSB0", "cpm_to_usvh_factor": 0.0057 },
//!   "mqtt": { "broker": "localhost" }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gmc_core::{
    AlertConfig, BatteryThresholds, DEFAULT_BAUD_RATE, MetricsConfig, RadiationBands,
    ReconnectOptions,
};
use gmc_store::LogConfig;

/// Name of the configuration file looked up by default.
pub const DEFAULT_CONFIG_FILE: &str = "gmc_config.json";

/// Minimum MQTT keep-alive accepted by the client, in seconds.
pub const MIN_KEEP_ALIVE: u64 = 5;

/// Monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Serial device settings.
    pub device: DeviceConfig,
    /// MQTT broker settings.
    pub mqtt: MqttConfig,
    /// Poll interval and display thresholds.
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// CSV data log.
    #[serde(default)]
    pub data_logging: DataLoggingConfig,
    /// Alert thresholds.
    #[serde(default)]
    pub alerts: AlertsConfig,
    /// Home Assistant device metadata.
    #[serde(default)]
    pub homeassistant: HomeAssistantConfig,
}

impl Config {
    /// A configuration suitable as a starting point, written by `init-config`.
    pub fn example() -> Self {
        Self {
            device: DeviceConfig {
                port: "/dev/ttyUSB0".to_string(),
                cpm_to_usvh_factor: 0.0057,
                timeout: default_device_timeout(),
                baud_rate: DEFAULT_BAUD_RATE,
                sync_datetime_on_start: true,
                check_time_drift: true,
                max_time_drift_seconds: default_max_time_drift(),
            },
            mqtt: MqttConfig::with_broker("localhost"),
            monitoring: MonitoringConfig::default(),
            logging: LoggingConfig::default(),
            data_logging: DataLoggingConfig::default(),
            alerts: AlertsConfig::default(),
            homeassistant: HomeAssistantConfig::default(),
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content + "\n").map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return all errors found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.device.validate());
        errors.extend(self.mqtt.validate());
        errors.extend(self.monitoring.validate());
        errors.extend(self.logging.validate());
        errors.extend(self.data_logging.validate());
        errors.extend(self.alerts.validate());
        errors.extend(self.homeassistant.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Non-fatal issues worth logging at startup.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.monitoring.low_battery_threshold_volts != self.alerts.low_battery_threshold_volts
            || self.monitoring.critical_battery_threshold_volts
                != self.alerts.critical_battery_threshold_volts
        {
            warnings.push(format!(
                "battery thresholds differ between monitoring ({:.2}/{:.2} V) and alerts \
                 ({:.2}/{:.2} V); alerts use the alerts values",
                self.monitoring.low_battery_threshold_volts,
                self.monitoring.critical_battery_threshold_volts,
                self.alerts.low_battery_threshold_volts,
                self.alerts.critical_battery_threshold_volts,
            ));
        }
        if self.mqtt.username.is_some() != self.mqtt.password.is_some() {
            warnings.push(
                "mqtt.username and mqtt.password must both be set; connecting anonymously"
                    .to_string(),
            );
        }
        if !self.mqtt.use_ssl
            && (self.mqtt.insecure || self.mqtt.ca_cert.is_some() || self.mqtt.cert_file.is_some())
        {
            warnings.push("TLS options are ignored because mqtt.use_ssl is false".to_string());
        }
        if !self.device.check_time_drift && self.device.sync_datetime_on_start {
            warnings.push(
                "check_time_drift is off; the device clock will be set unconditionally"
                    .to_string(),
            );
        }

        warnings
    }

    /// Settings for the metrics engine.
    ///
    /// Battery classification uses the `monitoring` thresholds.
    pub fn metrics_config(&self) -> MetricsConfig {
        let m = &self.monitoring;
        MetricsConfig {
            cpm_to_usvh_factor: self.device.cpm_to_usvh_factor,
            battery: BatteryThresholds {
                low_volts: m.low_battery_threshold_volts,
                critical_volts: m.critical_battery_threshold_volts,
                full_volts: m.battery_full_voltage,
                empty_volts: m.battery_empty_voltage,
            },
            radiation: RadiationBands {
                elevated: m.radiation_elevated_usvh,
                high: m.radiation_high_usvh,
                dangerous: m.radiation_dangerous_usvh,
            },
        }
    }

    /// Settings for the alert engine.
    pub fn alert_config(&self) -> AlertConfig {
        let a = &self.alerts;
        AlertConfig {
            high_radiation_threshold_usvh: a.high_radiation_threshold_usvh,
            high_radiation_duration: minutes(a.high_radiation_duration_minutes),
            enable_battery_alerts: a.enable_battery_alerts,
            low_battery_threshold_volts: a.low_battery_threshold_volts,
            critical_battery_threshold_volts: a.critical_battery_threshold_volts,
            low_battery_duration: minutes(a.low_battery_duration_minutes),
            critical_battery_duration: Duration::ZERO,
            device_offline_duration: minutes(a.device_offline_minutes),
        }
    }

    /// Settings for the data logger.
    pub fn log_config(&self) -> LogConfig {
        let d = &self.data_logging;
        LogConfig {
            enabled: d.enabled,
            csv_file: d.csv_file.clone(),
            max_file_size_mb: d.max_file_size_mb,
            enable_export: d.enable_export,
        }
    }

    /// Backoff used when the broker connection drops.
    pub fn reconnect_options(&self) -> ReconnectOptions {
        ReconnectOptions::new().max_delay(Duration::from_secs(
            self.mqtt.reconnect_max_delay_seconds,
        ))
    }
}

fn minutes(value: f64) -> Duration {
    Duration::try_from_secs_f64((value * 60.0).max(0.0)).unwrap_or(Duration::MAX)
}

/// Serial device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial port path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    /// Tube conversion factor from CPM to µSv/h.
    pub cpm_to_usvh_factor: f64,
    /// Reply timeout per command, in seconds.
    #[serde(default = "default_device_timeout")]
    pub timeout: u64,
    /// Serial baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Whether the device clock may be set at startup.
    #[serde(default = "default_true")]
    pub sync_datetime_on_start: bool,
    /// Whether the device clock is compared with the local clock at startup.
    #[serde(default = "default_true")]
    pub check_time_drift: bool,
    /// Drift above which the clock counts as wrong, in seconds.
    #[serde(default = "default_max_time_drift")]
    pub max_time_drift_seconds: u64,
}

fn default_device_timeout() -> u64 {
    3
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_true() -> bool {
    true
}

fn default_max_time_drift() -> u64 {
    300
}

impl DeviceConfig {
    /// Reply timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Validate device configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.port.trim().is_empty() {
            errors.push(ValidationError::new(
                "device.port",
                "serial port cannot be empty",
            ));
        }
        if !self.cpm_to_usvh_factor.is_finite() || self.cpm_to_usvh_factor <= 0.0 {
            errors.push(ValidationError::new(
                "device.cpm_to_usvh_factor",
                format!("must be positive, got {}", self.cpm_to_usvh_factor),
            ));
        }
        if self.timeout == 0 {
            errors.push(ValidationError::new("device.timeout", "must be at least 1 second"));
        }
        if self.baud_rate == 0 {
            errors.push(ValidationError::new("device.baud_rate", "cannot be 0"));
        }

        errors
    }
}

/// MQTT broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host, or a `mqtt://` / `mqtts://` URL.
    pub broker: String,
    /// Broker port, unless the broker URL names one.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Username; used only together with `password`.
    #[serde(default)]
    pub username: Option<String>,
    /// Password; used only together with `username`.
    #[serde(default)]
    pub password: Option<String>,
    /// MQTT client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,
    /// QoS level for all publishes (0, 1, or 2).
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// Prefix of the state and alert topics.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Home Assistant discovery prefix.
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    /// Retained online/offline topic, also the last will topic.
    #[serde(default = "default_availability_topic")]
    pub availability_topic: String,
    /// Connect over TLS.
    #[serde(default)]
    pub use_ssl: bool,
    /// CA certificate (PEM) used to verify the broker.
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    /// Client certificate (PEM) for mutual TLS.
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    /// Client private key for mutual TLS.
    ///
    /// Must be an unencrypted PKCS#8 PEM (`BEGIN PRIVATE KEY`). Traditional
    /// `BEGIN RSA PRIVATE KEY` files, as written by `openssl genrsa`, are
    /// rejected and need `openssl pkcs8 -topk8 -nocrypt` first.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Skip broker certificate and hostname verification.
    #[serde(default)]
    pub insecure: bool,
    /// Upper bound of the reconnect backoff, in seconds.
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_seconds: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "gmc-monitor".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_qos() -> u8 {
    1
}

fn default_topic_prefix() -> String {
    "homeassistant/sensor/gmc300e".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_availability_topic() -> String {
    "homeassistant/sensor/gmc300e/availability".to_string()
}

fn default_reconnect_max_delay() -> u64 {
    60
}

impl MqttConfig {
    /// Defaults for everything but the broker.
    pub fn with_broker(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            client_id: default_client_id(),
            keep_alive_seconds: default_keep_alive(),
            qos: default_qos(),
            topic_prefix: default_topic_prefix(),
            discovery_prefix: default_discovery_prefix(),
            availability_topic: default_availability_topic(),
            use_ssl: false,
            ca_cert: None,
            cert_file: None,
            key_file: None,
            insecure: false,
            reconnect_max_delay_seconds: default_reconnect_max_delay(),
        }
    }

    /// Validate MQTT configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.broker.trim().is_empty() {
            errors.push(ValidationError::new("mqtt.broker", "broker cannot be empty"));
        } else if let Err(message) = crate::mqtt::parse_broker(&self.broker, self.port, self.use_ssl)
        {
            errors.push(ValidationError::new("mqtt.broker", message));
        }
        if self.port == 0 {
            errors.push(ValidationError::new("mqtt.port", "port cannot be 0"));
        }
        if self.client_id.is_empty() {
            errors.push(ValidationError::new("mqtt.client_id", "cannot be empty"));
        }
        if self.keep_alive_seconds < MIN_KEEP_ALIVE {
            errors.push(ValidationError::new(
                "mqtt.keep_alive_seconds",
                format!("must be at least {} seconds", MIN_KEEP_ALIVE),
            ));
        }
        if self.qos > 2 {
            errors.push(ValidationError::new(
                "mqtt.qos",
                format!("invalid QoS {}: must be 0, 1, or 2", self.qos),
            ));
        }
        for (field, topic) in [
            ("mqtt.topic_prefix", &self.topic_prefix),
            ("mqtt.discovery_prefix", &self.discovery_prefix),
            ("mqtt.availability_topic", &self.availability_topic),
        ] {
            if topic.is_empty() {
                errors.push(ValidationError::new(field, "topic cannot be empty"));
            } else if topic.contains(['#', '+']) {
                errors.push(ValidationError::new(
                    field,
                    format!("'{}' must not contain MQTT wildcards", topic),
                ));
            }
        }
        if self.insecure && self.ca_cert.is_some() {
            errors.push(ValidationError::new(
                "mqtt.insecure",
                "cannot be combined with mqtt.ca_cert; pick one trust mode",
            ));
        }
        if self.cert_file.is_some() != self.key_file.is_some() {
            errors.push(ValidationError::new(
                "mqtt.cert_file",
                "cert_file and key_file must be given together",
            ));
        }
        // An unreadable key is left for the gateway to report.
        if let Some(key) = &self.key_file
            && let Ok(pem) = std::fs::read(key)
            && let Some(format) = crate::mqtt::unsupported_key_format(&pem)
        {
            errors.push(ValidationError::new(
                "mqtt.key_file",
                format!(
                    "{} is a {} key; {}",
                    key.display(),
                    format,
                    crate::mqtt::KEY_FORMAT_HINT
                ),
            ));
        }
        if self.reconnect_max_delay_seconds == 0 {
            errors.push(ValidationError::new(
                "mqtt.reconnect_max_delay_seconds",
                "must be at least 1 second",
            ));
        }

        errors
    }
}

/// Poll interval and display thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Seconds between poll cycles.
    pub update_interval_seconds: u64,
    /// Battery below this voltage is shown as Low.
    pub low_battery_threshold_volts: f64,
    /// Battery at or below this voltage is shown as Critical.
    pub critical_battery_threshold_volts: f64,
    /// Voltage shown as 100 %.
    pub battery_full_voltage: f64,
    /// Voltage shown as 0 %.
    pub battery_empty_voltage: f64,
    /// Start of the elevated dose-rate band.
    pub radiation_elevated_usvh: f64,
    /// Start of the high dose-rate band.
    pub radiation_high_usvh: f64,
    /// Start of the dangerous dose-rate band.
    pub radiation_dangerous_usvh: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        let battery = BatteryThresholds::default();
        let bands = RadiationBands::default();
        Self {
            update_interval_seconds: 60,
            low_battery_threshold_volts: battery.low_volts,
            critical_battery_threshold_volts: battery.critical_volts,
            battery_full_voltage: battery.full_volts,
            battery_empty_voltage: battery.empty_volts,
            radiation_elevated_usvh: bands.elevated,
            radiation_high_usvh: bands.high,
            radiation_dangerous_usvh: bands.dangerous,
        }
    }
}

impl MonitoringConfig {
    /// Poll interval as a duration.
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds)
    }

    /// Validate monitoring configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.update_interval_seconds == 0 {
            errors.push(ValidationError::new(
                "monitoring.update_interval_seconds",
                "must be at least 1 second",
            ));
        }
        if self.battery_full_voltage <= self.battery_empty_voltage {
            errors.push(ValidationError::new(
                "monitoring.battery_full_voltage",
                format!(
                    "full voltage {} must be above empty voltage {}",
                    self.battery_full_voltage, self.battery_empty_voltage
                ),
            ));
        }
        if self.critical_battery_threshold_volts >= self.low_battery_threshold_volts {
            errors.push(ValidationError::new(
                "monitoring.critical_battery_threshold_volts",
                "must be below monitoring.low_battery_threshold_volts",
            ));
        }
        if !(self.radiation_elevated_usvh < self.radiation_high_usvh
            && self.radiation_high_usvh < self.radiation_dangerous_usvh)
        {
            errors.push(ValidationError::new(
                "monitoring.radiation_high_usvh",
                "radiation bands must increase: elevated < high < dangerous",
            ));
        }

        errors
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level name: TRACE, DEBUG, INFO, WARNING, ERROR or CRITICAL.
    pub level: String,
    /// Write logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if crate::logging::parse_level(&self.level).is_none() {
            errors.push(ValidationError::new(
                "logging.level",
                format!("unknown level '{}'", self.level),
            ));
        }
        errors
    }
}

/// CSV data log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLoggingConfig {
    /// Whether readings are logged.
    pub enabled: bool,
    /// Path of the active log file.
    pub csv_file: PathBuf,
    /// Size bound of each log file, in megabytes.
    pub max_file_size_mb: f64,
    /// Whether the `export` command is allowed.
    pub enable_export: bool,
}

impl Default for DataLoggingConfig {
    fn default() -> Self {
        let log = LogConfig::default();
        Self {
            enabled: log.enabled,
            csv_file: log.csv_file,
            max_file_size_mb: log.max_file_size_mb,
            enable_export: log.enable_export,
        }
    }
}

impl DataLoggingConfig {
    /// Validate data logging configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.csv_file.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "data_logging.csv_file",
                "path cannot be empty",
            ));
        }
        if !self.max_file_size_mb.is_finite() || self.max_file_size_mb <= 0.0 {
            errors.push(ValidationError::new(
                "data_logging.max_file_size_mb",
                "must be positive",
            ));
        }
        errors
    }
}

/// Alert thresholds and hold times.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Dose rate above which the high-radiation alert breaches; `null`
    /// disables it.
    pub high_radiation_threshold_usvh: Option<f64>,
    /// Minutes the dose rate must stay high.
    pub high_radiation_duration_minutes: f64,
    /// Whether battery alerts are raised.
    pub enable_battery_alerts: bool,
    /// Low-battery alert threshold.
    pub low_battery_threshold_volts: f64,
    /// Critical-battery alert threshold.
    pub critical_battery_threshold_volts: f64,
    /// Minutes the battery must stay low.
    pub low_battery_duration_minutes: f64,
    /// Minutes without a successful poll before the device counts as offline.
    pub device_offline_minutes: f64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        let alerts = AlertConfig::default();
        Self {
            high_radiation_threshold_usvh: alerts.high_radiation_threshold_usvh,
            high_radiation_duration_minutes: alerts.high_radiation_duration.as_secs_f64() / 60.0,
            enable_battery_alerts: alerts.enable_battery_alerts,
            low_battery_threshold_volts: alerts.low_battery_threshold_volts,
            critical_battery_threshold_volts: alerts.critical_battery_threshold_volts,
            low_battery_duration_minutes: alerts.low_battery_duration.as_secs_f64() / 60.0,
            device_offline_minutes: alerts.device_offline_duration.as_secs_f64() / 60.0,
        }
    }
}

impl AlertsConfig {
    /// Validate alert configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(threshold) = self.high_radiation_threshold_usvh
            && (!threshold.is_finite() || threshold <= 0.0)
        {
            errors.push(ValidationError::new(
                "alerts.high_radiation_threshold_usvh",
                "must be positive, or null to disable",
            ));
        }
        for (field, value) in [
            (
                "alerts.high_radiation_duration_minutes",
                self.high_radiation_duration_minutes,
            ),
            (
                "alerts.low_battery_duration_minutes",
                self.low_battery_duration_minutes,
            ),
            ("alerts.device_offline_minutes", self.device_offline_minutes),
        ] {
            if !value.is_finite() || value < 0.0 {
                errors.push(ValidationError::new(field, "cannot be negative"));
            } else if Duration::try_from_secs_f64(value * 60.0).is_err() {
                errors.push(ValidationError::new(field, "is out of range"));
            }
        }
        if self.critical_battery_threshold_volts >= self.low_battery_threshold_volts {
            errors.push(ValidationError::new(
                "alerts.critical_battery_threshold_volts",
                "must be below alerts.low_battery_threshold_volts",
            ));
        }

        errors
    }
}

/// Home Assistant device metadata used in discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    /// Device name shown in Home Assistant.
    pub device_name: String,
    /// Device model.
    pub device_model: String,
    /// Device manufacturer.
    pub device_manufacturer: String,
    /// Stable identifier; prefixes every entity's unique id.
    pub device_identifier: String,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            device_name: "GMC-300E Plus".to_string(),
            device_model: "GMC-300E+".to_string(),
            device_manufacturer: "GQ Electronics".to_string(),
            device_identifier: "gmc300e_plus".to_string(),
        }
    }
}

impl HomeAssistantConfig {
    /// Validate Home Assistant configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.device_identifier.is_empty() {
            errors.push(ValidationError::new(
                "homeassistant.device_identifier",
                "cannot be empty",
            ));
        } else if self
            .device_identifier
            .contains(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        {
            errors.push(ValidationError::new(
                "homeassistant.device_identifier",
                "may only contain letters, digits, '_' and '-'",
            ));
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `mqtt.qos`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
///
/// `gmc_config.json` in the working directory, falling back to the user
/// config directory (e.g. `~/.config/gmc-monitor/gmc_config.json`) when only
/// that one exists.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    match dirs::config_dir() {
        Some(dir) => {
            let user = dir.join("gmc-monitor").join(DEFAULT_CONFIG_FILE);
            if user.exists() { user } else { local }
        }
        None => local,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "device": { "port": "/dev/ttyUSB0", "cpm_to_usvh_factor": 0.0057 },
        "mqtt": { "broker": "localhost" }
    }"#;

    fn minimal() -> Config {
        serde_json::from_str(MINIMAL).unwrap()
    }

    fn fields(config: &Config) -> Vec<String> {
        match config.validate() {
            Ok(()) => Vec::new(),
            Err(ConfigError::Validation(errors)) => errors.into_iter().map(|e| e.field).collect(),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = minimal();
        assert_eq!(config.device.timeout, 3);
        assert_eq!(config.device.baud_rate, 115_200);
        assert!(config.device.sync_datetime_on_start);
        assert!(config.device.check_time_drift);
        assert_eq!(config.device.max_time_drift_seconds, 300);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.client_id, "gmc-monitor");
        assert_eq!(config.mqtt.qos, 1);
        assert_eq!(config.mqtt.topic_prefix, "homeassistant/sensor/gmc300e");
        assert_eq!(
            config.mqtt.availability_topic,
            "homeassistant/sensor/gmc300e/availability"
        );
        assert_eq!(config.monitoring.update_interval_seconds, 60);
        assert_eq!(config.logging.level, "INFO");
        assert_eq!(config.data_logging.csv_file, PathBuf::from("gmc_data.csv"));
        assert_eq!(config.alerts.high_radiation_threshold_usvh, Some(0.5));
        assert_eq!(config.homeassistant.device_identifier, "gmc300e_plus");
        assert!(config.validate().is_ok());
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn test_missing_required_fields_fail_to_parse() {
        let no_port = r#"{
            "device": { "cpm_to_usvh_factor": 0.0057 },
            "mqtt": { "broker": "localhost" }
        }"#;
        assert!(serde_json::from_str::<Config>(no_port).is_err());

        let no_factor = r#"{
            "device": { "port": "/dev/ttyUSB0" },
            "mqtt": { "broker": "localhost" }
        }"#;
        assert!(serde_json::from_str::<Config>(no_factor).is_err());

        let no_mqtt = r#"{ "device": { "port": "/dev/ttyUSB0", "cpm_to_usvh_factor": 0.0057 } }"#;
        assert!(serde_json::from_str::<Config>(no_mqtt).is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("gmc_config.json");

        let mut config = Config::example();
        config.mqtt.username = Some("user".to_string());
        config.mqtt.password = Some("secret".to_string());
        config.alerts.high_radiation_threshold_usvh = None;
        config.save(&path).unwrap();

        let loaded = Config::load_validated(&path).unwrap();
        assert_eq!(loaded.device.port, "/dev/ttyUSB0");
        assert_eq!(loaded.mqtt.username.as_deref(), Some("user"));
        assert_eq!(loaded.alerts.high_radiation_threshold_usvh, None);
    }

    #[test]
    fn test_config_load_errors() {
        assert!(matches!(
            Config::load("/nonexistent/path/gmc_config.json"),
            Err(ConfigError::Read { .. })
        ));

        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_example_config_validates() {
        assert!(Config::example().validate().is_ok());
    }

    #[test]
    fn test_device_validation() {
        let mut config = minimal();
        config.device.cpm_to_usvh_factor = 0.0;
        config.device.timeout = 0;
        config.device.port = " ".to_string();
        assert_eq!(
            fields(&config),
            vec!["device.port", "device.cpm_to_usvh_factor", "device.timeout"]
        );

        config = minimal();
        config.device.cpm_to_usvh_factor = -1.0;
        assert_eq!(fields(&config), vec!["device.cpm_to_usvh_factor"]);
    }

    #[test]
    fn test_mqtt_validation() {
        let mut config = minimal();
        config.mqtt.qos = 3;
        config.mqtt.keep_alive_seconds = 2;
        config.mqtt.topic_prefix = "gmc/#".to_string();
        assert_eq!(
            fields(&config),
            vec!["mqtt.keep_alive_seconds", "mqtt.qos", "mqtt.topic_prefix"]
        );
    }

    #[test]
    fn test_tls_trust_modes_are_exclusive() {
        let mut config = minimal();
        config.mqtt.use_ssl = true;
        config.mqtt.insecure = true;
        config.mqtt.ca_cert = Some(PathBuf::from("/etc/ssl/ca.pem"));
        assert_eq!(fields(&config), vec!["mqtt.insecure"]);

        config.mqtt.insecure = false;
        config.mqtt.cert_file = Some(PathBuf::from("/etc/ssl/client.pem"));
        assert_eq!(fields(&config), vec!["mqtt.cert_file"]);

        config.mqtt.key_file = Some(PathBuf::from("/etc/ssl/client.key"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_traditional_key_file_rejected() {
        let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        let mut config = minimal();
        config.mqtt.use_ssl = true;
        config.mqtt.cert_file = Some(fixtures.join("client.crt"));
        config.mqtt.key_file = Some(fixtures.join("client.key"));
        assert!(config.validate().is_ok());

        config.mqtt.key_file = Some(fixtures.join("client-rsa.key"));
        let errors = match config.validate() {
            Err(ConfigError::Validation(errors)) => errors,
            other => panic!("expected validation errors, got {:?}", other),
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "mqtt.key_file");
        assert!(errors[0].message.contains("PKCS#1 RSA"));
        assert!(errors[0].message.contains("openssl pkcs8 -topk8 -nocrypt"));
    }

    #[test]
    fn test_threshold_validation() {
        let mut config = minimal();
        config.monitoring.battery_full_voltage = 6.0;
        config.monitoring.battery_empty_voltage = 6.0;
        config.monitoring.update_interval_seconds = 0;
        config.alerts.critical_battery_threshold_volts = 6.5;
        config.alerts.device_offline_minutes = 1e300;
        assert_eq!(
            fields(&config),
            vec![
                "monitoring.update_interval_seconds",
                "monitoring.battery_full_voltage",
                "alerts.device_offline_minutes",
                "alerts.critical_battery_threshold_volts",
            ]
        );
        // Conversion saturates rather than panicking.
        assert_eq!(
            config.alert_config().device_offline_duration,
            Duration::MAX
        );
    }

    #[test]
    fn test_logging_level_validation() {
        let mut config = minimal();
        config.logging.level = "WARNING".to_string();
        assert!(config.validate().is_ok());
        config.logging.level = "LOUD".to_string();
        assert_eq!(fields(&config), vec!["logging.level"]);
    }

    #[test]
    fn test_divergent_battery_thresholds_warn() {
        let mut config = minimal();
        config.alerts.low_battery_threshold_volts = 6.5;
        let warnings = config.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("alerts use the alerts values"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_conversions() {
        let config = minimal();

        let metrics = config.metrics_config();
        assert_eq!(metrics.cpm_to_usvh_factor, 0.0057);
        assert_eq!(metrics.battery.full_volts, 8.4);

        let alerts = config.alert_config();
        assert_eq!(alerts.high_radiation_duration, Duration::from_secs(120));
        assert_eq!(alerts.device_offline_duration, Duration::from_secs(300));
        assert_eq!(alerts.critical_battery_duration, Duration::ZERO);

        let log = config.log_config();
        assert!(log.enabled);
        assert_eq!(log.max_file_size_mb, 100.0);

        let reconnect = config.reconnect_options();
        assert_eq!(reconnect.max_delay, Duration::from_secs(60));
        assert!(reconnect.validate().is_ok());
    }

    #[test]
    fn test_config_validation_error_display() {
        let error = ConfigError::Validation(vec![
            ValidationError::new("mqtt.qos", "invalid QoS 3"),
            ValidationError::new("device.port", "cannot be empty"),
        ]);
        let display = error.to_string();
        assert!(display.contains("  - mqtt.qos: invalid QoS 3"));
        assert!(display.contains("  - device.port: cannot be empty"));
    }
}
