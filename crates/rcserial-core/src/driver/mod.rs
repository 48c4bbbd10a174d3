//! Chassis drivers
//!
//! A [`Driver`] translates application commands into the firmware's wheel
//! commands for one chassis layout. The hardware detector picks the
//! implementation from the `Hardware` answer using [`ChassisType::from_hardware`].
//!
//! Adding a chassis means a new [`Driver`] implementation, a [`ChassisType`]
//! variant and an entry in the prefix table.

mod arduino2wd;
mod state;

pub use arduino2wd::{digital_command, Arduino2Wd, Arduino2WdSettings};
pub use state::{Battery, BatterySettings, DeviceState, COMPILE_DATE_FORMAT};

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::command::EachWheelCommand;
use crate::config::Config;
use crate::error::{DriverError, Result};
use crate::protocol::Communicator;

/// Prefix every supported firmware's `Hardware` answer starts with
pub const FIRMWARE_FAMILY: &str = "Arduino";

/// Supported chassis layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChassisType {
    Arduino2Wd,
}

/// `Hardware` answer prefixes, checked in order
const CHASSIS_TABLE: &[(&str, ChassisType)] = &[("Arduino2WD", ChassisType::Arduino2Wd)];

impl ChassisType {
    /// Match a `Hardware` answer against the chassis table
    pub fn from_hardware(answer: &str) -> Result<Self> {
        if let Some((_, chassis)) = CHASSIS_TABLE
            .iter()
            .find(|(prefix, _)| answer.starts_with(prefix))
        {
            return Ok(*chassis);
        }
        if answer.starts_with(FIRMWARE_FAMILY) {
            Err(DriverError::UnsupportedHardware(format!(
                "Chassis of type {} is not supported by this driver version",
                answer
            )))
        } else {
            Err(DriverError::UnsupportedHardware(
                "\"Hardware\" command is not supported by firmware".to_string(),
            ))
        }
    }

    /// Wire prefix of this chassis
    pub fn prefix(&self) -> &'static str {
        CHASSIS_TABLE
            .iter()
            .find(|(_, chassis)| chassis == self)
            .map(|(prefix, _)| *prefix)
            .unwrap_or(FIRMWARE_FAMILY)
    }

    /// Build the driver for this chassis on a validated connection
    pub fn create_driver(
        &self,
        communicator: Arc<Communicator>,
        config: &Config,
    ) -> Result<Box<dyn Driver>> {
        match self {
            ChassisType::Arduino2Wd => Ok(Box::new(Arduino2Wd::new(communicator, config)?)),
        }
    }
}

impl fmt::Display for ChassisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Command translation for one chassis
///
/// Every send returns the firmware's answer line.
pub trait Driver: Send {
    fn chassis(&self) -> ChassisType;

    /// Single-joystick shift
    fn send_vector(&self, x: i32, y: i32) -> Result<String>;

    /// Independent left/right speeds in client units
    fn send_tractor(&self, left: i32, right: i32) -> Result<String>;

    /// Raw wheel speeds in device units
    fn send_each_wheel(&self, command: &EachWheelCommand) -> Result<String>;

    fn state(&self) -> &DeviceState;

    /// Refresh telemetry if the refresh period has elapsed; returns whether it did
    fn refresh_state(&mut self) -> Result<bool>;
}
