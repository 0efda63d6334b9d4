use std::time::Duration;

use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::connection::{self, ConnectionConfig};
use crate::estimator::EstimatorConfig;
use crate::smoother;

/// File looked up when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "config/bmu";

/// Address of the BMU the firmware was built for
pub const DEFAULT_DEVICE_ADDRESS: &str = "a4:c1:37:33:43:51";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub device: DeviceSettings,
    pub transport: TransportSettings,
    pub polling: PollingSettings,
    pub codec: CodecSettings,
    pub smoothing: SmoothingSettings,
    pub estimator: EstimatorSettings,
    pub log: LogSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceSettings {
    pub address: String,
    pub service_uuid: String,
    pub notify_uuid: String,
    pub write_uuid: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_DEVICE_ADDRESS.to_string(),
            service_uuid: connection::SERVICE_UUID.to_string(),
            notify_uuid: connection::NOTIFY_CHARACTERISTIC_UUID.to_string(),
            write_uuid: connection::WRITE_CHARACTERISTIC_UUID.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Ble,
    Emulator,
}

impl TransportKind {
    /// Name used in log messages
    pub fn name(self) -> &'static str {
        match self {
            TransportKind::Ble => "BLE",
            TransportKind::Emulator => "emulated BMU",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransportSettings {
    pub kind: TransportKind,
    /// Starting SOC of the emulated pack in %
    pub emulator_initial_soc: f64,
    /// SOC gained by the emulated pack per request in %
    pub emulator_soc_step: f64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::Ble,
            emulator_initial_soc: 42.0,
            emulator_soc_step: 0.05,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingSettings {
    pub request_interval_ms: u64,
    pub loop_delay_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            request_interval_ms: 1000,
            loop_delay_ms: 50,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CodecSettings {
    pub strict_checksum: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SmoothingSettings {
    pub window: usize,
}

impl Default for SmoothingSettings {
    fn default() -> Self {
        Self {
            window: smoother::DEFAULT_WINDOW,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EstimatorSettings {
    pub history: usize,
    pub min_samples: usize,
    pub charging_current_threshold_a: f64,
    pub min_rate_pct_per_s: f64,
    pub stall_timeout_s: u64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        let defaults = EstimatorConfig::default();
        Self {
            history: defaults.history,
            min_samples: defaults.min_samples,
            charging_current_threshold_a: defaults.charging_current_threshold,
            min_rate_pct_per_s: defaults.min_rate,
            stall_timeout_s: defaults.stall_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    pub show_target: bool,
    pub show_file_line: bool,
    pub ansi: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_target: false,
            show_file_line: false,
            ansi: true,
        }
    }
}

impl Settings {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            target_address: self.device.address.clone(),
            service_uuid: self.device.service_uuid.clone(),
            notify_uuid: self.device.notify_uuid.clone(),
            write_uuid: self.device.write_uuid.clone(),
            request_interval: Duration::from_millis(self.polling.request_interval_ms),
            strict_checksum: self.codec.strict_checksum,
        }
    }

    pub fn estimator_config(&self) -> EstimatorConfig {
        EstimatorConfig {
            history: self.estimator.history,
            min_samples: self.estimator.min_samples,
            charging_current_threshold: self.estimator.charging_current_threshold_a,
            min_rate: self.estimator.min_rate_pct_per_s,
            stall_timeout: Duration::from_secs(self.estimator.stall_timeout_s),
        }
    }

    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.polling.loop_delay_ms)
    }
}

/// Load settings from defaults, then the optional config file, then `BMU__*`
/// environment variables (e.g. `BMU__DEVICE__ADDRESS`).
pub fn load_settings(path: Option<&str>) -> anyhow::Result<Settings> {
    let builder = Config::builder()
        .add_source(File::with_name(path.unwrap_or(DEFAULT_CONFIG_PATH)).required(path.is_some()));
    build(builder.add_source(
        Environment::with_prefix("BMU")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    ))
}

fn build(builder: ConfigBuilder<config::builder::DefaultState>) -> anyhow::Result<Settings> {
    let settings = builder.build()?;
    Ok(settings.try_deserialize()?)
}
