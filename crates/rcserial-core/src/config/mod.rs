//! Driver configuration
//!
//! A flat string key/value store persisted as a properties file. Every
//! component reads its options from here at construction time; the hardware
//! detector writes the auto-detected port name back.

mod properties;

pub use properties::Properties;

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DriverError, Result};

/// Default configuration file name
pub const FILE_NAME: &str = "serial-driver.properties";

/// Recognized option names
pub mod keys {
    pub const COMM_PORT_NAME: &str = "CommPortName";
    pub const BAUD_RATE: &str = "SerialConnection.BaudRate";
    pub const PORT_INTERNAL_TIMEOUT: &str = "SerialConnection.PortInternalTimeout";
    pub const LISTENER_TIMEOUT: &str = "SerialCommunicator.PortListenerTimeout";
    pub const LISTENER_WARM_UP: &str = "SerialCommunicator.ListenerWarmUp";
    pub const STATE_REFRESH_PERIOD: &str = "SerialDriver.HardwareStateRefreshPeriod";
    pub const BATTERY_MIN_VOLTAGE: &str = "Battery.MinVoltage";
    pub const BATTERY_MAX_VOLTAGE: &str = "Battery.MaxVoltage";
    pub const BATTERY_MIN_VOLTAGE_CALIBRATION: &str = "Battery.MinVoltage.calibration";
    pub const BATTERY_MAX_VOLTAGE_CALIBRATION: &str = "Battery.MaxVoltage.calibration";
    pub const SERVICE_MAX_QUEUE_SIZE: &str = "SerialService.MaxQueueSize";
    pub const SERVICE_POLL_WAIT_TIMEOUT: &str = "SerialService.PollWaitTimeout";
    pub const SERVICE_RECONNECT_TIMEOUT: &str = "SerialService.ReconnectTimeout";
    pub const SERVICE_SLEEP_TIMEOUT: &str = "SerialService.SleepTimeout";
    pub const ARDUINO_2WD_MAX_CLIENT_VALUE: &str = "Arduino2WD.MaxClientValue";
    pub const ARDUINO_2WD_MAX_SPEED: &str = "Arduino2WD.MaxSpeed";
    pub const ARDUINO_2WD_INVERT_POLARITY: &str = "Arduino2WD.InvertPolarity";
}

/// Defaults written to a fresh configuration file. `CommPortName` has none.
pub const DEFAULTS: &[(&str, &str)] = &[
    (keys::BAUD_RATE, "9600"),
    (keys::PORT_INTERNAL_TIMEOUT, "100"),
    (keys::LISTENER_TIMEOUT, "2000"),
    (keys::LISTENER_WARM_UP, "2000"),
    (keys::STATE_REFRESH_PERIOD, "5000"),
    (keys::BATTERY_MIN_VOLTAGE, "6000"),
    (keys::BATTERY_MAX_VOLTAGE, "8400"),
    (keys::BATTERY_MIN_VOLTAGE_CALIBRATION, "6000"),
    (keys::BATTERY_MAX_VOLTAGE_CALIBRATION, "8400"),
    (keys::SERVICE_MAX_QUEUE_SIZE, "10"),
    (keys::SERVICE_POLL_WAIT_TIMEOUT, "500"),
    (keys::SERVICE_RECONNECT_TIMEOUT, "5000"),
    (keys::SERVICE_SLEEP_TIMEOUT, "60000"),
    (keys::ARDUINO_2WD_MAX_CLIENT_VALUE, "100"),
    (keys::ARDUINO_2WD_MAX_SPEED, "255"),
    (keys::ARDUINO_2WD_INVERT_POLARITY, "true"),
];

/// Shared configuration store
///
/// Reads go through a read lock; `set_option` takes the write lock and, for
/// file-backed stores, saves the file before returning.
#[derive(Debug)]
pub struct Config {
    path: Option<PathBuf>,
    props: RwLock<Properties>,
}

impl Config {
    /// Load the configuration file, creating it with defaults when missing
    ///
    /// Missing keys are filled in from [`DEFAULTS`] and the file is rewritten.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut props = match Properties::load(&path) {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("File \"{}\" not found", path.display());
                Properties::new()
            }
            Err(e) => {
                tracing::warn!(
                    "Can not load configuration from file \"{}\": {}",
                    path.display(),
                    e
                );
                return Err(e.into());
            }
        };

        let missing = fill_defaults(&mut props);
        let config = Self {
            path: Some(path),
            props: RwLock::new(props),
        };
        if missing > 0 {
            tracing::info!("Loading default configuration for {} keys..", missing);
            config.save("Default config. Created by rcserial")?;
        }
        Ok(config)
    }

    /// Defaults only, never written to disk
    pub fn in_memory() -> Self {
        let mut props = Properties::new();
        fill_defaults(&mut props);
        Self {
            path: None,
            props: RwLock::new(props),
        }
    }

    /// Builder-style override, not persisted
    pub fn with(self, key: &str, value: impl Into<String>) -> Self {
        self.props.write().set(key.to_string(), value.into());
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.props.read().get(key).map(str::to_string)
    }

    /// Change an option and persist the file
    pub fn set_option(&self, key: &str, value: &str, comment: &str) -> Result<()> {
        let old = {
            let mut props = self.props.write();
            let old = props.get(key).map(str::to_string);
            props.set(key.to_string(), value.to_string());
            old
        };
        tracing::info!(
            "Config changed \"{}\". Old={}; New={}",
            key,
            old.as_deref().unwrap_or("null"),
            value
        );
        self.save(comment)
    }

    /// Parse an option, failing with the offending value
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<T> {
        let value = self.get(key).unwrap_or_default();
        value.trim().parse().map_err(|_| DriverError::InvalidConfig {
            key: key.to_string(),
            value,
        })
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        let value = self.get(key).unwrap_or_default();
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(DriverError::InvalidConfig {
                key: key.to_string(),
                value,
            }),
        }
    }

    /// Option interpreted as milliseconds
    pub fn get_millis(&self, key: &str) -> Result<Duration> {
        self.parse::<u64>(key).map(Duration::from_millis)
    }

    fn save(&self, comment: &str) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        tracing::info!("Saving configuration to file..");
        let mut props = self.props.write();
        props.set_comment(comment);
        props.save(path).map_err(|e| {
            tracing::error!(
                "Can not write configuration to file \"{}\": {}",
                path.display(),
                e
            );
            DriverError::from(e)
        })
    }
}

fn fill_defaults(props: &mut Properties) -> usize {
    let mut missing = 0;
    for (key, value) in DEFAULTS {
        if !props.contains(key) {
            props.set(key.to_string(), value.to_string());
            missing += 1;
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_in_memory_defaults() {
        let config = Config::in_memory();
        assert_eq!(config.parse::<usize>(keys::SERVICE_MAX_QUEUE_SIZE).unwrap(), 10);
        assert_eq!(
            config.get_millis(keys::LISTENER_TIMEOUT).unwrap(),
            Duration::from_millis(2000)
        );
        assert!(config.get_bool(keys::ARDUINO_2WD_INVERT_POLARITY).unwrap());
        assert_eq!(config.get(keys::COMM_PORT_NAME), None);
    }

    #[test]
    fn test_invalid_value_reports_key() {
        let config = Config::in_memory().with(keys::SERVICE_MAX_QUEUE_SIZE, "ten");
        match config.parse::<usize>(keys::SERVICE_MAX_QUEUE_SIZE) {
            Err(DriverError::InvalidConfig { key, value }) => {
                assert_eq!(key, keys::SERVICE_MAX_QUEUE_SIZE);
                assert_eq!(value, "ten");
            }
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_load_creates_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);

        let config = Config::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.get(keys::BAUD_RATE).as_deref(), Some("9600"));

        let written = Properties::load(&path).unwrap();
        assert_eq!(written.len(), DEFAULTS.len());
    }

    #[test]
    fn test_set_option_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);

        let config = Config::load(&path).unwrap();
        config
            .set_option(
                keys::COMM_PORT_NAME,
                "/dev/ttyACM0",
                "Automatically detected port configuration",
            )
            .unwrap();

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(
            reloaded.get(keys::COMM_PORT_NAME).as_deref(),
            Some("/dev/ttyACM0")
        );
        assert_eq!(reloaded.get(keys::SERVICE_SLEEP_TIMEOUT).as_deref(), Some("60000"));
    }

    #[test]
    fn test_load_keeps_user_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);
        std::fs::write(&path, "SerialService.MaxQueueSize=3\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.parse::<usize>(keys::SERVICE_MAX_QUEUE_SIZE).unwrap(), 3);
        assert_eq!(config.get(keys::ARDUINO_2WD_MAX_SPEED).as_deref(), Some("255"));
    }
}
