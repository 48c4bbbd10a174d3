//! Device telemetry
//!
//! Identity fields are read once when the driver is created. Sensor fields
//! are re-read by [`DeviceState::refresh`], at most once per refresh period.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::config::{keys, Config};
use crate::error::{DriverError, Result};
use crate::protocol::{verbs, Communicator};

/// Format of the `CompileDate` answer, e.g. `Nov 04 2013 22:46:00`
pub const COMPILE_DATE_FORMAT: &str = "%b %d %Y %H:%M:%S";

/// Battery range and the raw readings measured at its ends, in millivolts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatterySettings {
    pub min_voltage: i32,
    pub max_voltage: i32,
    pub min_calibration: i32,
    pub max_calibration: i32,
}

impl Default for BatterySettings {
    fn default() -> Self {
        Self {
            min_voltage: 6000,
            max_voltage: 8400,
            min_calibration: 6000,
            max_calibration: 8400,
        }
    }
}

impl BatterySettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = Self {
            min_voltage: config.parse(keys::BATTERY_MIN_VOLTAGE)?,
            max_voltage: config.parse(keys::BATTERY_MAX_VOLTAGE)?,
            min_calibration: config.parse(keys::BATTERY_MIN_VOLTAGE_CALIBRATION)?,
            max_calibration: config.parse(keys::BATTERY_MAX_VOLTAGE_CALIBRATION)?,
        };
        if settings.max_voltage == settings.min_voltage {
            return Err(DriverError::InvalidConfig {
                key: keys::BATTERY_MAX_VOLTAGE.to_string(),
                value: settings.max_voltage.to_string(),
            });
        }
        if settings.max_calibration == settings.min_calibration {
            return Err(DriverError::InvalidConfig {
                key: keys::BATTERY_MAX_VOLTAGE_CALIBRATION.to_string(),
                value: settings.max_calibration.to_string(),
            });
        }
        Ok(settings)
    }
}

/// Power supply reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Battery {
    #[serde(skip)]
    settings: BatterySettings,
    /// Last reading as reported by the firmware (mV)
    raw_voltage: i32,
    /// Reading mapped through the calibration (mV)
    voltage: f64,
    /// Charge level, percent of the configured range
    level: i32,
}

impl Battery {
    pub fn new(settings: BatterySettings) -> Self {
        Self {
            settings,
            raw_voltage: 0,
            voltage: 0.0,
            level: 0,
        }
    }

    /// Record a raw reading and recompute the calibrated voltage and level
    pub fn set_voltage(&mut self, raw: i32) {
        let s = &self.settings;
        let (min, max) = (f64::from(s.min_voltage), f64::from(s.max_voltage));
        let (min_cal, max_cal) = (f64::from(s.min_calibration), f64::from(s.max_calibration));
        let voltage = (max - min) / (max_cal - min_cal) * (f64::from(raw) - min_cal) + min;
        let level = (100.0 * (voltage - min) / (max - min)).round() as i32;

        self.raw_voltage = raw;
        self.voltage = voltage;
        self.level = level;
    }

    pub fn raw_voltage(&self) -> i32 {
        self.raw_voltage
    }

    pub fn voltage(&self) -> f64 {
        self.voltage
    }

    pub fn level(&self) -> i32 {
        self.level
    }
}

/// Snapshot of the device's identity and sensors
#[derive(Debug, Clone, Serialize)]
pub struct DeviceState {
    pub firmware_version: String,
    pub hardware_type: String,
    pub total_ram: u32,
    pub sketch_size: u32,
    pub total_flash: u32,
    pub gcc_version: String,
    pub libc_version: String,
    pub sketch_source_name: String,
    pub compile_date: Option<NaiveDateTime>,
    pub cpu_target: String,

    pub battery: Battery,
    pub temperature: i32,
    pub free_ram: u32,
    /// Seconds since the board booted
    pub up_time: u64,

    #[serde(skip)]
    refresh_period: Duration,
    #[serde(skip)]
    refreshed_at: Option<Instant>,
}

impl DeviceState {
    /// Query the device's identity
    ///
    /// Sensor fields stay zero until the first [`refresh`](Self::refresh).
    pub fn read(comm: &Communicator, config: &Config) -> Result<Self> {
        let refresh_period = config.get_millis(keys::STATE_REFRESH_PERIOD)?;
        let battery = Battery::new(BatterySettings::from_config(config)?);

        let firmware_version = comm.send_command(verbs::VERSION)?;
        let hardware_type = comm.send_command(verbs::HARDWARE)?;
        let total_ram = query_number(comm, verbs::TOTAL_RAM)?;
        let sketch_size = query_number(comm, verbs::SKETCH_SIZE)?;
        let total_flash = query_number(comm, verbs::TOTAL_FLASH)?;
        let gcc_version = comm.send_command(verbs::GCC_VERSION)?;
        let libc_version = comm.send_command(verbs::LIBC_VERSION)?;
        let sketch_source_name = comm.send_command(verbs::SKETCH_SOURCE_NAME)?;
        let compile_date = parse_compile_date(&comm.send_command(verbs::COMPILE_DATE)?);
        let cpu_target = comm.send_command(verbs::GCC_CPU_TARGET)?;

        Ok(Self {
            firmware_version,
            hardware_type,
            total_ram,
            sketch_size,
            total_flash,
            gcc_version,
            libc_version,
            sketch_source_name,
            compile_date,
            cpu_target,
            battery,
            temperature: 0,
            free_ram: 0,
            up_time: 0,
            refresh_period,
            refreshed_at: None,
        })
    }

    /// Re-read the sensors unless the last refresh is younger than the period
    ///
    /// Returns whether the device was queried.
    pub fn refresh(&mut self, comm: &Communicator) -> Result<bool> {
        if !self.is_due() {
            return Ok(false);
        }
        let voltage = query_number(comm, verbs::VOLTAGE)?;
        let temperature = query_number(comm, verbs::TEMPERATURE)?;
        let free_ram = query_number(comm, verbs::FREE_RAM)?;
        let up_time = query_number(comm, verbs::UP_TIME)?;

        self.battery.set_voltage(voltage);
        self.temperature = temperature;
        self.free_ram = free_ram;
        self.up_time = up_time;
        self.refreshed_at = Some(Instant::now());
        tracing::debug!(
            "Device state: {}mV ({}%), {}C, {} bytes free, up {}s",
            self.battery.raw_voltage(),
            self.battery.level(),
            self.temperature,
            self.free_ram,
            self.up_time
        );
        Ok(true)
    }

    fn is_due(&self) -> bool {
        self.refreshed_at
            .map_or(true, |at| at.elapsed() >= self.refresh_period)
    }
}

/// Send `verb` and parse the answer as a number
fn query_number<T: FromStr>(comm: &Communicator, verb: &str) -> Result<T> {
    let answer = comm.send_command(verb)?;
    answer
        .trim()
        .parse()
        .map_err(|_| DriverError::InvalidTelemetry {
            command: verb.to_string(),
            value: answer,
        })
}

fn parse_compile_date(answer: &str) -> Option<NaiveDateTime> {
    match NaiveDateTime::parse_from_str(answer.trim(), COMPILE_DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(e) => {
            tracing::error!("Unparseable compile date '{}': {}", answer, e);
            None
        }
    }
}
