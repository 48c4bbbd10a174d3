//! Serial port handling
//!
//! Port enumeration and opening. The rest of the crate only sees the
//! [`PortProvider`] trait, so tests and the simulator can stand in for the OS.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use super::stream::{SerialChannel, Transport};
use crate::config::{keys, Config};
use crate::error::{DriverError, Result};

/// Default baud rate of the chassis firmware
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Options applied when opening a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    pub baud_rate: u32,
    /// Read/write timeout; also bounds how long the receive listener takes to notice a pause
    pub timeout: Duration,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_millis(100),
        }
    }
}

impl PortSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            baud_rate: config.parse(keys::BAUD_RATE)?,
            timeout: config.get_millis(keys::PORT_INTERNAL_TIMEOUT)?,
        })
    }
}

/// Source of candidate ports and of open transports
pub trait PortProvider: Send + Sync {
    /// Candidate port names in probing order
    fn list_ports(&self) -> Vec<String>;

    /// Open a port for the line protocol
    fn open(&self, name: &str, settings: &PortSettings) -> Result<Box<dyn Transport>>;
}

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb_info) => Self {
                name: info.port_name,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                product: usb_info.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key putting Arduino-style ports first:
///  - ttyACM* (sorted numerically by suffix)
///  - then ttyUSB* (sorted numerically)
///  - then other ports (sorted by name)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => tracing::warn!("Serial port enumeration failed: {}", e),
    }

    // Linux-only: add /dev/ttyACM* and /dev/ttyUSB* entries the API missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port as 8N1 with the given settings
pub fn open_port(name: &str, settings: &PortSettings) -> Result<Box<dyn SerialPort>> {
    let mut port = serialport::new(name, settings.baud_rate)
        .timeout(settings.timeout)
        .open()?;
    configure_port(port.as_mut())?;
    Ok(port)
}

/// Configure a serial port for the chassis line protocol
pub fn configure_port(port: &mut dyn SerialPort) -> Result<()> {
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;

    // Keep DTR asserted; toggling it resets most Arduino boards
    if let Err(e) = port.write_data_terminal_ready(true) {
        tracing::debug!("configure_port: failed to set DTR high: {} (continuing)", e);
    }
    if let Err(e) = port.write_request_to_send(true) {
        tracing::debug!("configure_port: failed to set RTS high: {} (continuing)", e);
    }

    Ok(())
}

/// [`PortProvider`] backed by the operating system's serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortProvider;

impl PortProvider for SerialPortProvider {
    fn list_ports(&self) -> Vec<String> {
        list_ports().into_iter().map(|p| p.name).collect()
    }

    fn open(&self, name: &str, settings: &PortSettings) -> Result<Box<dyn Transport>> {
        tracing::info!("Opening port {} at {} baud..", name, settings.baud_rate);
        let port = open_port(name, settings).map_err(|e| match e {
            DriverError::SerialError(msg) if msg.contains("busy") => {
                DriverError::PortInUse(name.to_string())
            }
            other => other,
        })?;
        let mut channel = SerialChannel::new(name, port);
        channel.clear_input_buffer()?;
        Ok(Box::new(channel))
    }
}
