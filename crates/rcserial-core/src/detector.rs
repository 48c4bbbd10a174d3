//! Hardware auto-detection
//!
//! Finds the chassis on the serial ports and binds the matching driver:
//!
//! 1. The port saved in the configuration is tried first.
//! 2. Otherwise every candidate port is opened and asked for its firmware
//!    version; the first one answering with the firmware signature wins and
//!    is saved for the next run.
//! 3. The `Hardware` answer selects the driver from the chassis table.

use std::sync::Arc;

use crate::config::{keys, Config};
use crate::driver::{ChassisType, Driver, FIRMWARE_FAMILY};
use crate::error::{DriverError, Result};
use crate::protocol::{verbs, Connection, ConnectionSettings, PortProvider};

/// Version answer prefix expected from supported firmware
pub const FIRMWARE_SIGNATURE: &str = FIRMWARE_FAMILY;

/// A validated connection with the driver bound to it
pub struct Session {
    connection: Connection,
    driver: Box<dyn Driver>,
}

impl Session {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn driver_mut(&mut self) -> &mut dyn Driver {
        self.driver.as_mut()
    }

    /// Suspend the receive listener
    pub fn pause(&self) {
        self.connection.pause();
    }

    pub fn resume(&self) -> Result<()> {
        self.connection.resume()
    }

    /// Release the driver and close the port
    pub fn disconnect(self) {
        let Session { connection, driver } = self;
        drop(driver);
        connection.disconnect();
    }
}

/// Locates the chassis and builds its driver
pub struct HardwareDetector {
    config: Arc<Config>,
    provider: Arc<dyn PortProvider>,
}

impl HardwareDetector {
    pub fn new(config: Arc<Config>, provider: Arc<dyn PortProvider>) -> Self {
        Self { config, provider }
    }

    /// Run the full detection sequence
    pub fn detect(&self) -> Result<Session> {
        let settings = ConnectionSettings::from_config(&self.config)?;
        let connection = match self.check_saved_port(&settings) {
            Some(connection) => connection,
            None => self.scan_ports(&settings)?,
        };

        match self.bind_driver(&connection) {
            Ok(driver) => Ok(Session { connection, driver }),
            Err(e) => {
                connection.disconnect();
                Err(e)
            }
        }
    }

    fn check_saved_port(&self, settings: &ConnectionSettings) -> Option<Connection> {
        let Some(port_name) = self.config.get(keys::COMM_PORT_NAME) else {
            tracing::warn!(
                "{} not found in configuration file. Nothing to check.",
                keys::COMM_PORT_NAME
            );
            return None;
        };
        match self.try_port(&port_name, settings) {
            Ok(connection) => Some(connection),
            Err(e) => {
                tracing::error!("Saved port {}: {}", port_name, e);
                None
            }
        }
    }

    fn scan_ports(&self, settings: &ConnectionSettings) -> Result<Connection> {
        tracing::info!("Trying to detect {} on any serial port..", FIRMWARE_SIGNATURE);
        let ports = self.provider.list_ports();
        let count = ports.len();
        for (i, port_name) in ports.iter().enumerate() {
            tracing::info!("Checking port: {} ({} of {})", port_name, i + 1, count);
            match self.try_port(port_name, settings) {
                Ok(connection) => {
                    self.save_port(port_name);
                    return Ok(connection);
                }
                Err(e) => tracing::error!("{}", e),
            }
        }
        Err(DriverError::DeviceNotFound)
    }

    /// Open `port_name` and check the firmware signature
    fn try_port(&self, port_name: &str, settings: &ConnectionSettings) -> Result<Connection> {
        let mut connection = Connection::open(self.provider.as_ref(), port_name, settings)?;
        match connection.validate_firmware(FIRMWARE_SIGNATURE) {
            Ok(_) => Ok(connection),
            Err(e) => {
                connection.disconnect();
                Err(e)
            }
        }
    }

    fn save_port(&self, port_name: &str) {
        tracing::info!("Saving {} to configuration file for future runs", port_name);
        if let Err(e) = self.config.set_option(
            keys::COMM_PORT_NAME,
            port_name,
            "Automatically detected port configuration",
        ) {
            tracing::error!("Failed to save detected port {}: {}", port_name, e);
        }
    }

    fn bind_driver(&self, connection: &Connection) -> Result<Box<dyn Driver>> {
        let communicator = connection.communicator();
        let answer = communicator.send_command(verbs::HARDWARE)?;
        let chassis = ChassisType::from_hardware(&answer)?;
        tracing::info!("Hardware detected: {}", answer);
        chassis.create_driver(communicator, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sim::{SimulatedDevice, SimulatedPortProvider};

    fn fast_config() -> Config {
        Config::in_memory()
            .with(keys::LISTENER_WARM_UP, "0")
            .with(keys::LISTENER_TIMEOUT, "200")
            .with(keys::PORT_INTERNAL_TIMEOUT, "10")
    }

    #[test]
    fn test_detects_on_saved_port() {
        let provider = SimulatedPortProvider::new();
        provider.add_empty_port("/dev/ttyS0");
        let device = SimulatedDevice::arduino_2wd();
        provider.add_device("/dev/ttyACM3", device.clone());

        let config = Arc::new(fast_config().with(keys::COMM_PORT_NAME, "/dev/ttyACM3"));
        let detector = HardwareDetector::new(config, Arc::new(provider));
        let session = detector.detect().unwrap();

        assert_eq!(session.connection().port_name(), "/dev/ttyACM3");
        assert_eq!(session.driver().chassis(), ChassisType::Arduino2Wd);
        assert_eq!(device.opens(), 1);
        session.disconnect();
        assert_eq!(device.open_handles(), 0);
    }

    #[test]
    fn test_unsupported_chassis_releases_port() {
        let provider = SimulatedPortProvider::new();
        let device = SimulatedDevice::arduino_2wd().with_hardware("Arduino4WD");
        provider.add_device("/dev/ttyACM0", device.clone());

        let detector = HardwareDetector::new(Arc::new(fast_config()), Arc::new(provider));
        let err = detector.detect().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedHardware);
        assert_eq!(device.open_handles(), 0);
    }

    #[test]
    fn test_no_ports() {
        let detector = HardwareDetector::new(
            Arc::new(fast_config()),
            Arc::new(SimulatedPortProvider::new()),
        );
        assert!(matches!(detector.detect(), Err(DriverError::DeviceNotFound)));
    }
}
