//! # rcserial Core Library
//!
//! Host-side driver for Arduino-based robot chassis on a serial link.
//!
//! This library provides:
//! - A timestamp-ordered command queue for motion intents
//! - A service loop that filters stale, duplicate and backlogged commands
//! - The firmware's line-based request/response protocol
//! - Port auto-detection and automatic reconnection
//! - Per-chassis speed translation and telemetry
//!
//! ## Example
//!
//! ```rust,ignore
//! use rcserial_core::prelude::*;
//! use std::sync::Arc;
//!
//! let config = Arc::new(Config::load("serial-driver.properties")?);
//! let service = Service::new(config, Arc::new(SerialPortProvider))?;
//! service.start()?;
//!
//! // Joystick pushed halfway to the right
//! service.command_queue().put(Command::vector(50, 0, now_millis()));
//! ```

pub mod command;
pub mod config;
pub mod detector;
pub mod driver;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod service;
pub mod sim;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::command::{Command, EachWheelCommand};
    pub use crate::config::Config;
    pub use crate::detector::{HardwareDetector, Session};
    pub use crate::driver::{ChassisType, DeviceState, Driver};
    pub use crate::error::{DriverError, ErrorKind, Result};
    pub use crate::protocol::{ConnectionState, PortProvider, SerialPortProvider};
    pub use crate::queue::{CommandQueue, DataListener};
    pub use crate::service::{Service, ServiceState};
    pub use crate::now_millis;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wall-clock milliseconds since the Unix epoch, for command timestamps
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
