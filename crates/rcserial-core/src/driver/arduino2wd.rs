//! Arduino-based two-wheel differential drive

use std::sync::Arc;

use super::{ChassisType, DeviceState, Driver};
use crate::command::EachWheelCommand;
use crate::config::{keys, Config};
use crate::error::{DriverError, Result};
use crate::protocol::{verbs, Communicator};

/// Input and output ranges of the speed translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arduino2WdSettings {
    /// Client input magnitude that maps to full speed
    pub max_client_value: i32,
    /// Full wheel speed in device units
    pub max_speed: i32,
    /// Negate tractor speeds before sending
    pub invert_polarity: bool,
}

impl Default for Arduino2WdSettings {
    fn default() -> Self {
        Self {
            max_client_value: 100,
            max_speed: 255,
            invert_polarity: true,
        }
    }
}

impl Arduino2WdSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = Self {
            max_client_value: config.parse(keys::ARDUINO_2WD_MAX_CLIENT_VALUE)?,
            max_speed: config.parse(keys::ARDUINO_2WD_MAX_SPEED)?,
            invert_polarity: config.get_bool(keys::ARDUINO_2WD_INVERT_POLARITY)?,
        };
        if settings.max_client_value <= 0 {
            return Err(DriverError::InvalidConfig {
                key: keys::ARDUINO_2WD_MAX_CLIENT_VALUE.to_string(),
                value: settings.max_client_value.to_string(),
            });
        }
        if settings.max_speed <= 0 {
            return Err(DriverError::InvalidConfig {
                key: keys::ARDUINO_2WD_MAX_SPEED.to_string(),
                value: settings.max_speed.to_string(),
            });
        }
        Ok(settings)
    }

    /// Joystick shift to `(left, right)` wheel speeds
    ///
    /// `y` grows upwards on the joystick and downwards on the wheels, so it is
    /// negated before mixing.
    pub fn vector_to_wheels(&self, x: i32, y: i32) -> (i32, i32) {
        let max_speed = i64::from(self.max_speed);
        let max_client = i64::from(self.max_client_value);
        let x = i64::from(x);
        let y = -i64::from(y);

        let hypot = (x as f64).hypot(y as f64).round() as i64;
        let mut c = if hypot >= max_client {
            max_speed
        } else {
            max_speed * hypot / max_client
        };
        let sign = if y < 0 { -1 } else { 1 };

        let mut turn = if y == 0 {
            0
        } else {
            max_speed / ((x / y).abs() + 1)
        };
        turn = turn.min(max_speed) * sign;
        c *= sign;

        // Quadrants I and IV drive with the left wheel, II and III with the right
        let (left, right) = if x >= 0 { (c, turn) } else { (turn, c) };
        (left as i32, right as i32)
    }

    /// Left/right stick values to `(left, right)` wheel speeds
    pub fn tractor_to_wheels(&self, left: i32, right: i32) -> (i32, i32) {
        let left = self.scale(left);
        let right = self.scale(right);
        if self.invert_polarity {
            (-left, -right)
        } else {
            (left, right)
        }
    }

    fn scale(&self, value: i32) -> i32 {
        let value = i64::from(value);
        let max_client = i64::from(self.max_client_value);
        let max_speed = i64::from(self.max_speed);
        let speed = if value.abs() >= max_client {
            value.signum() * max_speed
        } else {
            value * max_speed / max_client
        };
        speed as i32
    }
}

/// Wire form of a wheel speed pair
pub fn digital_command(left: i32, right: i32) -> String {
    format!("{}:{},{}", verbs::DIGITAL, left, right)
}

/// Driver for the `Arduino2WD` chassis
pub struct Arduino2Wd {
    communicator: Arc<Communicator>,
    settings: Arduino2WdSettings,
    state: DeviceState,
}

impl Arduino2Wd {
    /// Bind to a validated connection and read the device identity
    pub fn new(communicator: Arc<Communicator>, config: &Config) -> Result<Self> {
        let settings = Arduino2WdSettings::from_config(config)?;
        let state = DeviceState::read(&communicator, config)?;
        Ok(Self {
            communicator,
            settings,
            state,
        })
    }

    pub fn settings(&self) -> &Arduino2WdSettings {
        &self.settings
    }

    fn send_wheels(&self, (left, right): (i32, i32)) -> Result<String> {
        self.communicator.send_command(&digital_command(left, right))
    }
}

impl Driver for Arduino2Wd {
    fn chassis(&self) -> ChassisType {
        ChassisType::Arduino2Wd
    }

    fn send_vector(&self, x: i32, y: i32) -> Result<String> {
        self.send_wheels(self.settings.vector_to_wheels(x, y))
    }

    fn send_tractor(&self, left: i32, right: i32) -> Result<String> {
        self.send_wheels(self.settings.tractor_to_wheels(left, right))
    }

    fn send_each_wheel(&self, command: &EachWheelCommand) -> Result<String> {
        match *command {
            EachWheelCommand::TwoWheel { left, right } => self.send_wheels((left, right)),
        }
    }

    fn state(&self) -> &DeviceState {
        &self.state
    }

    fn refresh_state(&mut self) -> Result<bool> {
        self.state.refresh(&self.communicator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommunicatorSettings;
    use crate::sim::SimulatedDevice;
    use std::time::Duration;

    #[test]
    fn test_vector_stop() {
        let s = Arduino2WdSettings::default();
        assert_eq!(s.vector_to_wheels(0, 0), (0, 0));
    }

    #[test]
    fn test_vector_full_right() {
        let s = Arduino2WdSettings::default();
        assert_eq!(s.vector_to_wheels(100, 0), (255, 0));
        assert_eq!(s.vector_to_wheels(250, 0), (255, 0));
    }

    #[test]
    fn test_vector_full_left() {
        let s = Arduino2WdSettings::default();
        assert_eq!(s.vector_to_wheels(-100, 0), (0, 255));
    }

    #[test]
    fn test_vector_straight() {
        let s = Arduino2WdSettings::default();
        // Stick forward drives both wheels at full negative speed
        assert_eq!(s.vector_to_wheels(0, 100), (-255, -255));
        assert_eq!(s.vector_to_wheels(0, -100), (255, 255));
    }

    #[test]
    fn test_vector_half_speed_diagonal() {
        let s = Arduino2WdSettings::default();
        // hypot(30, 40) = 50 -> 127; |30 / -40| = 0 -> turn 255
        assert_eq!(s.vector_to_wheels(30, 40), (-127, -255));
        // |-80 / 20| = 4 -> turn 51; hypot = 82 -> 209
        assert_eq!(s.vector_to_wheels(-80, -20), (51, 209));
    }

    #[test]
    fn test_vector_extreme_input_saturates() {
        let s = Arduino2WdSettings::default();
        assert_eq!(s.vector_to_wheels(i32::MIN, i32::MIN), (127, 255));
        assert_eq!(s.vector_to_wheels(i32::MAX, 0), (255, 0));
    }

    #[test]
    fn test_tractor_polarity() {
        let s = Arduino2WdSettings::default();
        assert_eq!(s.tractor_to_wheels(100, 100), (-255, -255));
        assert_eq!(s.tractor_to_wheels(-150, 50), (255, -127));
        assert_eq!(s.tractor_to_wheels(0, 0), (0, 0));

        let plain = Arduino2WdSettings {
            invert_polarity: false,
            ..s
        };
        assert_eq!(plain.tractor_to_wheels(100, -100), (255, -255));
    }

    #[test]
    fn test_settings_validation() {
        let config = Config::in_memory().with(keys::ARDUINO_2WD_MAX_CLIENT_VALUE, "0");
        assert!(Arduino2WdSettings::from_config(&config).is_err());

        let config = Config::in_memory().with(keys::ARDUINO_2WD_INVERT_POLARITY, "false");
        assert!(!Arduino2WdSettings::from_config(&config).unwrap().invert_polarity);
    }

    #[test]
    fn test_driver_sends_digital_commands() {
        let device = SimulatedDevice::arduino_2wd();
        let comm = Arc::new(Communicator::new(
            Box::new(device.connect("sim0")),
            CommunicatorSettings {
                answer_timeout: Duration::from_millis(300),
                warm_up: Duration::ZERO,
            },
        ));
        comm.init_listener().unwrap();

        let driver = Arduino2Wd::new(comm, &Config::in_memory()).unwrap();
        assert_eq!(driver.chassis(), ChassisType::Arduino2Wd);
        assert_eq!(driver.state().hardware_type, "Arduino2WD");

        driver.send_vector(100, 0).unwrap();
        driver.send_tractor(100, 100).unwrap();
        driver
            .send_each_wheel(&EachWheelCommand::TwoWheel { left: 10, right: -10 })
            .unwrap();
        assert_eq!(
            device.wheel_commands(),
            vec!["Digital:255,0", "Digital:-255,-255", "Digital:10,-10"]
        );
        assert_eq!(device.wheels(), (10, -10));
    }
}
