//! ---
//! erc_section: "01-core-functionality"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Shared primitives and utilities for the rig controller."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_mode() -> Mode {
    Mode::Live
}

fn default_interval_minutes() -> u32 {
    20
}

fn default_timestamp_column() -> String {
    "TIMESTAMP".to_owned()
}

fn default_power_column() -> String {
    "InvPDC_kW_Avg".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_field_baud() -> u32 {
    9_600
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(1_000)
}

fn default_slave() -> u8 {
    1
}

/// Primary configuration object for the ERC runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "ERC_CONFIG";

    /// Load configuration from disk, respecting the `ERC_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig { config, source: path });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig { config, source: path });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.devices.validate()?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            devices: DevicesConfig::default(),
            scheduler: SchedulerConfig::default(),
            trace: TraceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Operating mode for the orchestrator.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Drive the physical plant over the configured serial lines.
    #[default]
    Live,
    /// Drive in-memory simulated slaves from the historical trace.
    Replay,
}

impl Mode {
    pub fn is_replay(&self) -> bool {
        matches!(self, Mode::Replay)
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(Mode::Live),
            "replay" => Ok(Mode::Replay),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Serial settings for one field device. Slave address and register layout
/// are fixed per device model; only the line parameters vary per site.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialDeviceConfig {
    pub port: String,
    #[serde(default = "default_field_baud")]
    pub baud: u32,
    #[serde(default = "default_slave")]
    pub slave: u8,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
}

impl SerialDeviceConfig {
    fn named(port: &str, baud: u32, poll_ms: u64) -> Self {
        Self {
            port: port.to_owned(),
            baud,
            slave: default_slave(),
            poll_interval: Duration::from_millis(poll_ms),
        }
    }
}

/// One serial line per device; no two devices share a line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesConfig {
    pub relay: SerialDeviceConfig,
    pub supply: SerialDeviceConfig,
    pub pump: SerialDeviceConfig,
    pub pressure: SerialDeviceConfig,
    pub leak: SerialDeviceConfig,
    /// All ten valve servos hang off one RS-485 bus, addressed 1..=10.
    pub servo_bus: SerialDeviceConfig,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            relay: SerialDeviceConfig::named("/dev/ttyUSB0", 115_200, 950),
            supply: SerialDeviceConfig::named("/dev/ttyUSB1", 19_200, 1_000),
            pump: SerialDeviceConfig::named("/dev/ttyUSB2", 9_600, 1_000),
            pressure: SerialDeviceConfig::named("/dev/ttyUSB3", 9_600, 1_000),
            leak: SerialDeviceConfig::named("/dev/ttyUSB4", 9_600, 250),
            servo_bus: SerialDeviceConfig::named("/dev/ttyUSB5", 9_600, 500),
        }
    }
}

impl DevicesConfig {
    pub fn validate(&self) -> Result<()> {
        let ports = [
            &self.relay.port,
            &self.supply.port,
            &self.pump.port,
            &self.pressure.port,
            &self.leak.port,
            &self.servo_bus.port,
        ];
        for (i, a) in ports.iter().enumerate() {
            for b in ports.iter().skip(i + 1) {
                if a == b {
                    return Err(anyhow!(
                        "serial line {} assigned to more than one device",
                        a
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Scheduling parameters for the reactor ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
    /// Pin the scale factor instead of searching for it at startup.
    #[serde(default)]
    pub scale_factor: Option<f64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            scale_factor: None,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_minutes == 0 {
            return Err(anyhow!("scheduler interval_minutes must be non-zero"));
        }
        if let Some(x) = self.scale_factor {
            if !(x > 0.0) {
                return Err(anyhow!("scale_factor must be positive, got {}", x));
            }
        }
        Ok(())
    }
}

/// Historical power trace input used for the scale-factor search and,
/// in replay mode, as the live tick source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    #[serde(default = "default_power_column")]
    pub power_column: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/onemin-ground.csv"),
            timestamp_column: default_timestamp_column(),
            power_column: default_power_column(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        AppConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn parses_minimal_toml() {
        let config: AppConfig = r#"
mode = "replay"

[scheduler]
interval_minutes = 1

[trace]
path = "data/trace.csv"
"#
        .parse()
        .expect("config parses");
        assert!(config.mode.is_replay());
        assert_eq!(config.scheduler.interval_minutes, 1);
        assert_eq!(config.trace.power_column, "InvPDC_kW_Avg");
    }

    #[test]
    fn rejects_shared_serial_line() {
        let mut config = AppConfig::default();
        config.devices.pump.port = config.devices.relay.port.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_interval() {
        let mut config = AppConfig::default();
        config.scheduler.interval_minutes = 0;
        assert!(config.validate().is_err());
    }
}
