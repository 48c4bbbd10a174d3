//! Serial Protocol Communication
//!
//! Implements the chassis firmware's text protocol: one ASCII command line
//! per request, one answer line per command, newline-terminated.

mod communicator;
mod connection;
pub mod serial;
mod stream;

pub use communicator::{Communicator, CommunicatorSettings};
pub use connection::{Connection, ConnectionSettings, ConnectionState};
pub use serial::{list_ports, PortInfo, PortProvider, PortSettings, SerialPortProvider};
pub use stream::{SerialChannel, Transport};

/// Line terminator of every command and answer
pub const NEW_LINE: u8 = b'\n';

/// Longest answer line kept; extra bytes up to the newline are dropped
pub const MAX_LINE_LENGTH: usize = 200;

/// Unclaimed answer lines kept; older ones are discarded first
pub const MAX_PENDING_LINES: usize = 16;

/// Wire verbs understood by the firmware
pub mod verbs {
    pub const VERSION: &str = "Version";
    pub const HARDWARE: &str = "Hardware";
    pub const TOTAL_RAM: &str = "TotalRAM";
    pub const SKETCH_SIZE: &str = "SketchSize";
    pub const TOTAL_FLASH: &str = "TotalFlash";
    pub const GCC_VERSION: &str = "GccVersion";
    pub const LIBC_VERSION: &str = "LibcVersion";
    pub const SKETCH_SOURCE_NAME: &str = "SketchSourceName";
    pub const COMPILE_DATE: &str = "CompileDate";
    pub const GCC_CPU_TARGET: &str = "GccCpuTarget";
    pub const VOLTAGE: &str = "Voltage";
    pub const TEMPERATURE: &str = "Temperature";
    pub const FREE_RAM: &str = "FreeRAM";
    pub const UP_TIME: &str = "UpTime";
    /// Prefix of the per-wheel speed command, `Digital:<left>,<right>`
    pub const DIGITAL: &str = "Digital";
}
