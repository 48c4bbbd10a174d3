//! Line-based request/response over a [`Transport`]
//!
//! A listener thread drains the port into a bounded line buffer. Callers of
//! [`Communicator::send_command`] write one line and wait on a condition
//! variable until the listener has seen a complete answer line or the answer
//! timeout expires. Only one request may be outstanding at a time.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::stream::{is_idle_read, Transport};
use super::{MAX_LINE_LENGTH, MAX_PENDING_LINES, NEW_LINE};
use crate::config::{keys, Config};
use crate::error::{DriverError, Result};

/// Timing options for the communicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommunicatorSettings {
    /// How long `send_command` waits for the answer line
    pub answer_timeout: Duration,
    /// Pause after starting the listener, while the board resets
    pub warm_up: Duration,
}

impl Default for CommunicatorSettings {
    fn default() -> Self {
        Self {
            answer_timeout: Duration::from_millis(2000),
            warm_up: Duration::from_millis(2000),
        }
    }
}

impl CommunicatorSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            answer_timeout: config.get_millis(keys::LISTENER_TIMEOUT)?,
            warm_up: config.get_millis(keys::LISTENER_WARM_UP)?,
        })
    }
}

#[derive(Default)]
struct LineBuffer {
    current: Vec<u8>,
    lines: VecDeque<String>,
    truncated: bool,
    closed: Option<String>,
}

/// Receive side shared between the listener thread and the waiting caller
#[derive(Default)]
struct Inbox {
    buffer: Mutex<LineBuffer>,
    line_ready: Condvar,
}

impl Inbox {
    fn feed(&self, bytes: &[u8]) {
        let mut buf = self.buffer.lock();
        let mut completed = false;
        for &byte in bytes {
            if byte == NEW_LINE {
                // Empty lines carry no answer
                if !buf.current.is_empty() {
                    let raw = std::mem::take(&mut buf.current);
                    let line = String::from_utf8_lossy(&raw)
                        .trim_end_matches('\r')
                        .to_string();
                    if buf.lines.len() >= MAX_PENDING_LINES {
                        if let Some(dropped) = buf.lines.pop_front() {
                            tracing::warn!("Unclaimed line dropped: {}", dropped);
                        }
                    }
                    buf.lines.push_back(line);
                    completed = true;
                }
                buf.truncated = false;
            } else if buf.current.len() < MAX_LINE_LENGTH {
                buf.current.push(byte);
            } else if !buf.truncated {
                buf.truncated = true;
                tracing::warn!(
                    "Answer line longer than {} bytes, dropping the rest",
                    MAX_LINE_LENGTH
                );
            }
        }
        drop(buf);
        if completed {
            self.line_ready.notify_all();
        }
    }

    fn close(&self, reason: String) {
        self.buffer.lock().closed = Some(reason);
        self.line_ready.notify_all();
    }

    fn reopen(&self) {
        self.buffer.lock().closed = None;
    }

    /// Wait for the next complete line until `deadline`
    fn wait_line(&self, deadline: Instant) -> Result<Option<String>> {
        let mut buf = self.buffer.lock();
        loop {
            if let Some(line) = buf.lines.pop_front() {
                return Ok(Some(line));
            }
            if let Some(reason) = &buf.closed {
                return Err(DriverError::SerialError(reason.clone()));
            }
            if self.line_ready.wait_until(&mut buf, deadline).timed_out() {
                return Ok(buf.lines.pop_front());
            }
        }
    }

    fn pending_lines(&self) -> usize {
        self.buffer.lock().lines.len()
    }
}

struct ListenerHandle {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Serial request/response channel
pub struct Communicator {
    port_name: String,
    /// Held for a whole request/answer exchange
    request: Mutex<()>,
    writer: Mutex<Option<Box<dyn Transport>>>,
    inbox: Arc<Inbox>,
    listener: Mutex<Option<ListenerHandle>>,
    settings: CommunicatorSettings,
}

impl Communicator {
    pub fn new(transport: Box<dyn Transport>, settings: CommunicatorSettings) -> Self {
        Self {
            port_name: transport.name().to_string(),
            request: Mutex::new(()),
            writer: Mutex::new(Some(transport)),
            inbox: Arc::new(Inbox::default()),
            listener: Mutex::new(None),
            settings,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn settings(&self) -> &CommunicatorSettings {
        &self.settings
    }

    /// Start the listener and wait out the warm-up period
    pub fn init_listener(&self) -> Result<()> {
        self.start_listener()?;
        if !self.settings.warm_up.is_zero() {
            tracing::debug!(
                "Waiting {}ms for {} to settle",
                self.settings.warm_up.as_millis(),
                self.port_name
            );
            thread::sleep(self.settings.warm_up);
        }
        Ok(())
    }

    /// Spawn the receive listener if it is not already running
    pub fn start_listener(&self) -> Result<()> {
        let mut slot = self.listener.lock();
        if let Some(handle) = slot.as_ref() {
            if handle.running.load(Ordering::Acquire) {
                return Ok(());
            }
        }
        if let Some(stale) = slot.take() {
            if stale.thread.join().is_err() {
                tracing::error!("Listener on {} panicked", self.port_name);
            }
        }

        let mut reader = match self.writer.lock().as_ref() {
            Some(transport) => transport.try_clone()?,
            None => return Err(DriverError::NotConnected),
        };
        let running = Arc::new(AtomicBool::new(true));
        let inbox = self.inbox.clone();
        inbox.reopen();

        let flag = running.clone();
        let port_name = self.port_name.clone();
        let thread = thread::Builder::new()
            .name(format!("rcserial-listener-{}", port_name))
            .spawn(move || {
                let mut chunk = [0u8; 64];
                while flag.load(Ordering::Acquire) {
                    match reader.read(&mut chunk) {
                        Ok(0) => {
                            tracing::warn!("Port {} closed by the device", port_name);
                            inbox.close(format!("Port {} closed", port_name));
                            break;
                        }
                        Ok(n) => inbox.feed(&chunk[..n]),
                        Err(e) if is_idle_read(&e) => {}
                        Err(e) => {
                            tracing::error!("Read from {} failed: {}", port_name, e);
                            inbox.close(format!("Read from {} failed: {}", port_name, e));
                            break;
                        }
                    }
                }
                flag.store(false, Ordering::Release);
                tracing::debug!("Listener on {} exited", port_name);
            })?;

        *slot = Some(ListenerHandle { running, thread });
        Ok(())
    }

    /// Stop the receive listener and wait for its thread
    ///
    /// Returns within one transport read timeout.
    pub fn stop_listener(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.running.store(false, Ordering::Release);
            if handle.thread.join().is_err() {
                tracing::error!("Listener on {} panicked", self.port_name);
            }
        }
    }

    /// Stop the listener and close the port. Later requests fail with `NotConnected`.
    pub fn close(&self) {
        self.stop_listener();
        if self.writer.lock().take().is_some() {
            tracing::info!("Port {} closed", self.port_name);
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer.lock().is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .map(|h| h.running.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Send one command line and wait for the answer line
    ///
    /// On timeout the receive buffer is left as is; a late answer will be
    /// returned to the next caller.
    pub fn send_command(&self, command: &str) -> Result<String> {
        if !self.is_listening() {
            return Err(DriverError::NotConnected);
        }
        let _exchange = self.request.lock();
        tracing::debug!("HW command: {}", command);

        let sent_at = Instant::now();
        {
            let mut guard = self.writer.lock();
            let writer = guard.as_mut().ok_or(DriverError::NotConnected)?;
            writer.write_all(command.as_bytes())?;
            writer.write_all(&[NEW_LINE])?;
            writer.flush()?;
        }

        match self.inbox.wait_line(sent_at + self.settings.answer_timeout)? {
            Some(answer) => {
                tracing::debug!("HW answer: {}", answer);
                Ok(answer)
            }
            None => Err(DriverError::AnswerTimeout {
                command: command.to_string(),
                timeout_ms: self.settings.answer_timeout.as_millis() as u64,
            }),
        }
    }

    /// Complete lines received but not yet claimed by a request
    pub fn pending_lines(&self) -> usize {
        self.inbox.pending_lines()
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedDevice;

    fn settings(timeout_ms: u64) -> CommunicatorSettings {
        CommunicatorSettings {
            answer_timeout: Duration::from_millis(timeout_ms),
            warm_up: Duration::ZERO,
        }
    }

    #[test]
    fn test_inbox_splits_lines() {
        let inbox = Inbox::default();
        inbox.feed(b"Ardu");
        inbox.feed(b"ino2WD\r\n\nOK\n");
        let deadline = Instant::now();
        assert_eq!(inbox.wait_line(deadline).unwrap().as_deref(), Some("Arduino2WD"));
        assert_eq!(inbox.wait_line(deadline).unwrap().as_deref(), Some("OK"));
        assert_eq!(inbox.wait_line(deadline).unwrap(), None);
    }

    #[test]
    fn test_inbox_bounds_line_length() {
        let inbox = Inbox::default();
        let long = vec![b'x'; MAX_LINE_LENGTH + 50];
        inbox.feed(&long);
        inbox.feed(b"\n");
        let line = inbox.wait_line(Instant::now()).unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_LENGTH);
    }

    #[test]
    fn test_inbox_drops_oldest_unclaimed_lines() {
        let inbox = Inbox::default();
        for i in 0..1000 {
            inbox.feed(format!("chatter {}\n", i).as_bytes());
        }
        assert_eq!(inbox.pending_lines(), MAX_PENDING_LINES);

        let first = inbox.wait_line(Instant::now()).unwrap().unwrap();
        assert_eq!(first, format!("chatter {}", 1000 - MAX_PENDING_LINES));
    }

    #[test]
    fn test_send_command_returns_answer() {
        let device = SimulatedDevice::arduino_2wd();
        let comm = Communicator::new(Box::new(device.connect("sim0")), settings(500));
        comm.init_listener().unwrap();

        assert_eq!(comm.send_command("Hardware").unwrap(), "Arduino2WD");
        assert_eq!(device.received(), vec!["Hardware".to_string()]);
        comm.close();
        assert!(!comm.is_listening());
        assert!(!comm.is_open());
        assert!(matches!(
            comm.send_command("Hardware"),
            Err(DriverError::NotConnected)
        ));
    }

    #[test]
    fn test_send_command_times_out() {
        let device = SimulatedDevice::arduino_2wd();
        device.set_silent(true);
        let comm = Communicator::new(Box::new(device.connect("sim0")), settings(150));
        comm.init_listener().unwrap();

        let start = Instant::now();
        let err = comm.send_command("Version").unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(err, DriverError::AnswerTimeout { .. }));
        assert!(err.is_transport());
        assert!(elapsed >= Duration::from_millis(150), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1000), "{:?}", elapsed);
    }

    #[test]
    fn test_send_without_listener_fails() {
        let device = SimulatedDevice::arduino_2wd();
        let comm = Communicator::new(Box::new(device.connect("sim0")), settings(100));
        assert!(matches!(
            comm.send_command("Version"),
            Err(DriverError::NotConnected)
        ));
    }

    #[test]
    fn test_listener_restarts_after_pause() {
        let device = SimulatedDevice::arduino_2wd();
        let comm = Communicator::new(Box::new(device.connect("sim0")), settings(500));
        comm.start_listener().unwrap();
        comm.stop_listener();
        comm.start_listener().unwrap();
        assert!(comm.is_listening());
        assert_eq!(comm.send_command("TotalRAM").unwrap(), "2048");
    }
}
