//! Simulated chassis for running without hardware
//!
//! [`SimulatedDevice`] answers the firmware's text protocol the way an
//! Arduino 2WD board does, with a little noise on the sensor readings.
//! [`SimulatedPortProvider`] exposes simulated devices as named ports.

use parking_lot::{Condvar, Mutex};
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{DriverError, Result};
use crate::protocol::{verbs, PortProvider, PortSettings, Transport, NEW_LINE};

/// Firmware state and behaviour switches
struct Firmware {
    version: String,
    hardware: String,
    silent: bool,
    dead_verbs: HashSet<String>,
    answers: HashMap<String, String>,
    received: Vec<String>,
    wheels: (i32, i32),
    booted_at: Instant,
    open_handles: usize,
    opens: usize,
}

impl Firmware {
    fn answer(&mut self, line: &str) -> Option<String> {
        self.received.push(line.to_string());
        let verb = line.split(':').next().unwrap_or(line);
        if self.silent || self.dead_verbs.contains(verb) {
            return None;
        }
        if let Some(answer) = self.answers.get(verb) {
            return Some(answer.clone());
        }

        let mut rng = rand::thread_rng();
        let answer = match verb {
            verbs::VERSION => self.version.clone(),
            verbs::HARDWARE => self.hardware.clone(),
            verbs::TOTAL_RAM => "2048".to_string(),
            verbs::SKETCH_SIZE => "9216".to_string(),
            verbs::TOTAL_FLASH => "32256".to_string(),
            verbs::GCC_VERSION => "4.8.1".to_string(),
            verbs::LIBC_VERSION => "1.8.0".to_string(),
            verbs::SKETCH_SOURCE_NAME => "Arduino2WD.ino".to_string(),
            verbs::COMPILE_DATE => "Nov 04 2013 22:46:00".to_string(),
            verbs::GCC_CPU_TARGET => "avr5".to_string(),
            verbs::VOLTAGE => (7400 + rng.gen_range(-20..=20)).to_string(),
            verbs::TEMPERATURE => (25 + rng.gen_range(-1..=1)).to_string(),
            verbs::FREE_RAM => (1200 - rng.gen_range(0..=16)).to_string(),
            verbs::UP_TIME => self.booted_at.elapsed().as_secs().to_string(),
            verbs::DIGITAL => match parse_wheels(line) {
                Some(wheels) => {
                    self.wheels = wheels;
                    format!("OK {},{}", wheels.0, wheels.1)
                }
                None => format!("Bad speeds: {}", line),
            },
            other => format!("Unknown command: {}", other),
        };
        Some(answer)
    }
}

fn parse_wheels(line: &str) -> Option<(i32, i32)> {
    let (_, speeds) = line.split_once(':')?;
    let (left, right) = speeds.split_once(',')?;
    Some((left.trim().parse().ok()?, right.trim().parse().ok()?))
}

/// Bytes travelling from the device to the host
#[derive(Default)]
struct Pipe {
    bytes: Mutex<VecDeque<u8>>,
    ready: Condvar,
}

/// A simulated Arduino board; clones share the same board
#[derive(Clone)]
pub struct SimulatedDevice {
    firmware: Arc<Mutex<Firmware>>,
    to_host: Arc<Pipe>,
}

impl SimulatedDevice {
    /// 2WD chassis with stock firmware
    pub fn arduino_2wd() -> Self {
        Self {
            firmware: Arc::new(Mutex::new(Firmware {
                version: "Arduino SerialDriver firmware v1.2".to_string(),
                hardware: "Arduino2WD".to_string(),
                silent: false,
                dead_verbs: HashSet::new(),
                answers: HashMap::new(),
                received: Vec::new(),
                wheels: (0, 0),
                booted_at: Instant::now(),
                open_handles: 0,
                opens: 0,
            })),
            to_host: Arc::new(Pipe::default()),
        }
    }

    /// Answer `Version` with `version`
    pub fn with_firmware(self, version: &str) -> Self {
        self.firmware.lock().version = version.to_string();
        self
    }

    /// Answer `Hardware` with `hardware`
    pub fn with_hardware(self, hardware: &str) -> Self {
        self.firmware.lock().hardware = hardware.to_string();
        self
    }

    /// Stop answering anything
    pub fn set_silent(&self, silent: bool) {
        self.firmware.lock().silent = silent;
    }

    /// Never answer `verb` until [`revive_verb`](Self::revive_verb)
    pub fn kill_verb(&self, verb: &str) {
        self.firmware.lock().dead_verbs.insert(verb.to_string());
    }

    pub fn revive_verb(&self, verb: &str) {
        self.firmware.lock().dead_verbs.remove(verb);
    }

    /// Fixed answer for `verb`
    pub fn set_answer(&self, verb: &str, answer: &str) {
        self.firmware
            .lock()
            .answers
            .insert(verb.to_string(), answer.to_string());
    }

    /// Every line received, in order
    pub fn received(&self) -> Vec<String> {
        self.firmware.lock().received.clone()
    }

    /// Received `Digital:` wheel commands, in order
    pub fn wheel_commands(&self) -> Vec<String> {
        self.firmware
            .lock()
            .received
            .iter()
            .filter(|l| l.starts_with(verbs::DIGITAL))
            .cloned()
            .collect()
    }

    /// Last wheel speeds set
    pub fn wheels(&self) -> (i32, i32) {
        self.firmware.lock().wheels
    }

    /// Number of transport handles currently open on this device
    pub fn open_handles(&self) -> usize {
        self.firmware.lock().open_handles
    }

    /// How many times the device was opened
    pub fn opens(&self) -> usize {
        self.firmware.lock().opens
    }

    /// Open a fresh transport on this device
    pub fn connect(&self, name: &str) -> SimulatedTransport {
        self.firmware.lock().opens += 1;
        self.to_host.bytes.lock().clear();
        SimulatedTransport::new(name.to_string(), self.clone())
    }

    fn deliver(&self, line: &str) {
        let answer = self.firmware.lock().answer(line);
        if let Some(answer) = answer {
            let mut bytes = self.to_host.bytes.lock();
            bytes.extend(answer.as_bytes());
            bytes.push_back(NEW_LINE);
            drop(bytes);
            self.to_host.ready.notify_all();
        }
    }
}

/// Host-side handle on a [`SimulatedDevice`]
pub struct SimulatedTransport {
    name: String,
    device: SimulatedDevice,
    outgoing: Vec<u8>,
    timeout: Duration,
}

impl SimulatedTransport {
    fn new(name: String, device: SimulatedDevice) -> Self {
        device.firmware.lock().open_handles += 1;
        Self {
            name,
            device,
            outgoing: Vec::new(),
            timeout: Duration::from_millis(10),
        }
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        let mut firmware = self.device.firmware.lock();
        firmware.open_handles = firmware.open_handles.saturating_sub(1);
    }
}

impl Read for SimulatedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pipe = &self.device.to_host;
        let deadline = Instant::now() + self.timeout;
        let mut bytes = pipe.bytes.lock();
        while bytes.is_empty() {
            if pipe.ready.wait_until(&mut bytes, deadline).timed_out() && bytes.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
            }
        }
        let n = buf.len().min(bytes.len());
        for (slot, byte) in buf.iter_mut().zip(bytes.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            if byte == NEW_LINE {
                let line = String::from_utf8_lossy(&self.outgoing).to_string();
                self.outgoing.clear();
                self.device.deliver(&line);
            } else {
                self.outgoing.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for SimulatedTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.device.to_host.bytes.lock().clear();
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        let mut clone = SimulatedTransport::new(self.name.clone(), self.device.clone());
        clone.timeout = self.timeout;
        Ok(Box::new(clone))
    }
}

/// Named ports, some with a simulated device behind them
#[derive(Default, Clone)]
pub struct SimulatedPortProvider {
    ports: Arc<Mutex<Vec<(String, Option<SimulatedDevice>)>>>,
}

impl SimulatedPortProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider with a single 2WD chassis on `/dev/ttyACM0`
    pub fn with_chassis() -> (Self, SimulatedDevice) {
        let provider = Self::new();
        let device = SimulatedDevice::arduino_2wd();
        provider.add_device("/dev/ttyACM0", device.clone());
        (provider, device)
    }

    pub fn add_device(&self, name: &str, device: SimulatedDevice) {
        self.ports.lock().push((name.to_string(), Some(device)));
    }

    /// A port that opens but has nothing connected
    pub fn add_empty_port(&self, name: &str) {
        self.ports.lock().push((name.to_string(), None));
    }

    pub fn remove_port(&self, name: &str) {
        self.ports.lock().retain(|(n, _)| n != name);
    }
}

impl PortProvider for SimulatedPortProvider {
    fn list_ports(&self) -> Vec<String> {
        self.ports.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    fn open(&self, name: &str, settings: &PortSettings) -> Result<Box<dyn Transport>> {
        let device = self
            .ports
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| DriverError::PortNotFound(name.to_string()))?;

        // An empty port behaves like a board that never answers
        let device = device.unwrap_or_else(|| {
            let nobody = SimulatedDevice::arduino_2wd();
            nobody.set_silent(true);
            nobody
        });
        let mut transport = device.connect(name);
        transport.set_timeout(settings.timeout)?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_answers_identity() {
        let device = SimulatedDevice::arduino_2wd();
        let mut transport = device.connect("sim0");
        transport.write_all(b"Hardware\n").unwrap();

        let mut buf = [0u8; 64];
        let n = transport.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"Arduino2WD\n");
    }

    #[test]
    fn test_device_tracks_wheels() {
        let device = SimulatedDevice::arduino_2wd();
        let mut transport = device.connect("sim0");
        transport.write_all(b"Digital:-255,128\n").unwrap();
        assert_eq!(device.wheels(), (-255, 128));
        assert_eq!(device.wheel_commands(), vec!["Digital:-255,128".to_string()]);
    }

    #[test]
    fn test_silent_device_times_out() {
        let device = SimulatedDevice::arduino_2wd();
        device.set_silent(true);
        let mut transport = device.connect("sim0");
        transport.write_all(b"Version\n").unwrap();

        let mut buf = [0u8; 8];
        let err = transport.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_handles_are_counted() {
        let device = SimulatedDevice::arduino_2wd();
        let transport = device.connect("sim0");
        let clone = transport.try_clone().unwrap();
        assert_eq!(device.open_handles(), 2);
        drop(clone);
        drop(transport);
        assert_eq!(device.open_handles(), 0);
    }

    #[test]
    fn test_provider_lists_in_insertion_order() {
        let provider = SimulatedPortProvider::new();
        provider.add_empty_port("/dev/ttyS0");
        provider.add_device("/dev/ttyACM0", SimulatedDevice::arduino_2wd());
        assert_eq!(provider.list_ports(), vec!["/dev/ttyS0", "/dev/ttyACM0"]);
        assert!(provider.open("/dev/ttyUSB7", &PortSettings::default()).is_err());
    }
}
