//! Command service
//!
//! The service owns the command queue and a worker thread that drains it into
//! the driver. Per iteration the worker:
//!
//! 1. (re)detects the chassis while there is no connection, waiting the
//!    reconnect backoff between attempts;
//! 2. refreshes telemetry, rate-limited by the driver;
//! 3. polls the queue; on timeout it either sends a STOP after a non-STOP
//!    command or counts idle time towards pausing;
//! 4. discards stale, duplicate and backlogged commands;
//! 5. dispatches what is left.
//!
//! Transport and hardware errors drop the connection and go back to
//! detection. Anything else ends the worker.

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::command::Command;
use crate::config::{keys, Config};
use crate::detector::{HardwareDetector, Session};
use crate::driver::DeviceState;
use crate::error::{DriverError, ErrorKind, Result};
use crate::protocol::{ConnectionState, PortProvider};
use crate::queue::CommandQueue;

/// Lifecycle of the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    Stopped,
    Running,
    /// `stop` was requested; the worker has not exited yet
    Stopping,
    /// Idle with the serial listener suspended; the next `put` resumes
    Paused,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping..",
            ServiceState::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Queue and timing options of the service loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Commands polled while more than this many are waiting are discarded
    pub max_queue_size: usize,
    pub poll_wait_timeout: Duration,
    /// Wait between failed detection attempts
    pub reconnect_timeout: Duration,
    /// Idle time after a STOP before the service pauses
    pub sleep_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 10,
            poll_wait_timeout: Duration::from_millis(500),
            reconnect_timeout: Duration::from_millis(5000),
            sleep_timeout: Duration::from_millis(60000),
        }
    }
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            max_queue_size: config.parse(keys::SERVICE_MAX_QUEUE_SIZE)?,
            poll_wait_timeout: config.get_millis(keys::SERVICE_POLL_WAIT_TIMEOUT)?,
            reconnect_timeout: config.get_millis(keys::SERVICE_RECONNECT_TIMEOUT)?,
            sleep_timeout: config.get_millis(keys::SERVICE_SLEEP_TIMEOUT)?,
        })
    }
}

/// Why a polled command was not dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bypass {
    Stale,
    Duplicate,
    Backlog(usize),
}

fn bypass_reason(last: &Command, command: &Command, backlog: usize, max: usize) -> Option<Bypass> {
    if command.timestamp_millis() < last.timestamp_millis() {
        Some(Bypass::Stale)
    } else if command == last {
        Some(Bypass::Duplicate)
    } else if backlog > max {
        Some(Bypass::Backlog(backlog))
    } else {
        None
    }
}

/// State shared between the service handle, its worker and the queue listener
struct Shared {
    detector: HardwareDetector,
    settings: ServiceSettings,
    queue: Arc<CommandQueue>,
    state: Mutex<ServiceState>,
    state_changed: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Connection kept while paused
    session: Mutex<Option<Session>>,
    last_dispatched: Mutex<Command>,
    connection_state: Mutex<ConnectionState>,
    device_state: Mutex<Option<DeviceState>>,
}

impl Shared {
    /// Spawn the worker from `Stopped` or `Paused`; `wake` restricts it to `Paused`
    fn launch(self: &Arc<Self>, wake: bool) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            ServiceState::Paused => {}
            ServiceState::Stopped if !wake => {}
            other => {
                tracing::debug!("Service is {}, start ignored", other);
                return Ok(());
            }
        }
        tracing::info!(
            "{} service..",
            if *state == ServiceState::Paused { "Resuming" } else { "Starting" }
        );
        *state = ServiceState::Running;

        let shared = self.clone();
        let spawned = thread::Builder::new()
            .name("rcserial-service".to_string())
            .spawn(move || Worker::new(shared).run());
        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                self.state_changed.notify_all();
                Ok(())
            }
            Err(e) => {
                *state = ServiceState::Stopped;
                Err(e.into())
            }
        }
    }

    fn is_running(&self) -> bool {
        *self.state.lock() == ServiceState::Running
    }

    /// Sleep for the reconnect backoff unless the service is stopped meanwhile
    fn wait_backoff(&self) {
        let deadline = Instant::now() + self.settings.reconnect_timeout;
        let mut state = self.state.lock();
        while *state == ServiceState::Running {
            if self.state_changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }

    fn set_connection_state(&self, connection_state: ConnectionState) {
        *self.connection_state.lock() = connection_state;
    }

    fn publish(&self, session: &Session) {
        *self.device_state.lock() = Some(session.driver().state().clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Stopped,
    Paused,
}

/// The worker thread's loop state
///
/// Dropping it hands the connection back to [`Shared`] and publishes the
/// final service state, also when the loop panics.
struct Worker {
    shared: Arc<Shared>,
    session: Option<Session>,
    last: Command,
    last_activity: Instant,
    exit: Exit,
}

impl Worker {
    fn new(shared: Arc<Shared>) -> Self {
        let session = shared.session.lock().take();
        let last = *shared.last_dispatched.lock();
        Self {
            shared,
            session,
            last,
            last_activity: Instant::now(),
            exit: Exit::Stopped,
        }
    }

    fn run(mut self) {
        if let Some(session) = self.session.take() {
            match session.resume() {
                Ok(()) => self.session = Some(session),
                Err(e) => {
                    tracing::error!("Failed to resume serial listener: {}", e);
                    session.disconnect();
                    self.shared.set_connection_state(ConnectionState::Error);
                }
            }
        }

        match self.run_loop() {
            Ok(exit) => self.exit = exit,
            Err(e) => tracing::error!("Service loop failed: {}", e),
        }
    }

    fn run_loop(&mut self) -> Result<Exit> {
        while self.shared.is_running() {
            if self.session.is_none() && !self.reconnect()? {
                break;
            }
            match self.step() {
                Ok(Some(exit)) => return Ok(exit),
                Ok(None) => {}
                Err(e) if e.kind() == ErrorKind::Fatal => return Err(e),
                Err(e) => {
                    tracing::error!("{}", e);
                    self.shared.set_connection_state(ConnectionState::Error);
                    if let Some(session) = self.session.take() {
                        session.disconnect();
                    }
                }
            }
        }
        Ok(Exit::Stopped)
    }

    /// Detect until connected; `Ok(false)` when the service stopped meanwhile
    fn reconnect(&mut self) -> Result<bool> {
        while self.shared.is_running() {
            tracing::info!("Trying to reconnect robot..");
            self.shared.set_connection_state(ConnectionState::Probing);
            match self.shared.detector.detect() {
                Ok(session) => {
                    self.shared.set_connection_state(ConnectionState::Connected);
                    self.shared.publish(&session);
                    self.session = Some(session);
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::Fatal => return Err(e),
                Err(e) => {
                    tracing::error!("{}", e);
                    self.shared.set_connection_state(ConnectionState::Error);
                    self.shared.wait_backoff();
                }
            }
        }
        Ok(false)
    }

    fn step(&mut self) -> Result<Option<Exit>> {
        let shared = &self.shared;
        let settings = &shared.settings;
        let session = self.session.as_mut().ok_or(DriverError::NotConnected)?;

        if session.driver_mut().refresh_state()? {
            shared.publish(session);
        }

        let polled = shared.queue.poll(settings.poll_wait_timeout);
        let now = Instant::now();
        let command = match polled {
            Some(command) => command,
            None if self.last.is_stop() => {
                tracing::trace!("Lifecycle tick");
                if now.duration_since(self.last_activity) > settings.sleep_timeout {
                    tracing::info!("Pause serial listener");
                    session.pause();
                    return Ok(Some(Exit::Paused));
                }
                return Ok(None);
            }
            None => self.last.stop_like(self.last.timestamp_millis()),
        };
        let backlog = shared.queue.len();
        self.last_activity = now;

        if let Some(reason) = bypass_reason(&self.last, &command, backlog, settings.max_queue_size)
        {
            tracing::debug!("Bypass {}: {:?}", command, reason);
            return Ok(None);
        }

        let driver = session.driver();
        let answer = match command {
            Command::Vector { x, y, .. } => driver.send_vector(x, y)?,
            Command::Tractor { left, right, .. } => driver.send_tractor(left, right)?,
        };
        tracing::info!("{} -> {}", command, answer);

        self.last = command;
        *shared.last_dispatched.lock() = command;
        Ok(None)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            *self.shared.session.lock() = Some(session);
        }

        let paused = {
            let mut state = self.shared.state.lock();
            *state = if self.exit == Exit::Paused && *state == ServiceState::Running {
                ServiceState::Paused
            } else {
                ServiceState::Stopped
            };
            self.shared.state_changed.notify_all();
            *state == ServiceState::Paused
        };
        tracing::info!("Exit the lifecycle");

        // A command may have landed between the last poll and the pause
        if paused && !self.shared.queue.is_empty() {
            if let Err(e) = self.shared.launch(true) {
                tracing::error!("Failed to resume service: {}", e);
            }
        }
    }
}

/// Serial command service
///
/// Construct one per chassis and keep it for the life of the application.
/// Producers push commands into [`command_queue`](Self::command_queue).
pub struct Service {
    shared: Arc<Shared>,
}

impl Service {
    pub fn new(config: Arc<Config>, provider: Arc<dyn PortProvider>) -> Result<Self> {
        let settings = ServiceSettings::from_config(&config)?;
        let queue = Arc::new(CommandQueue::new());
        let shared = Arc::new(Shared {
            detector: HardwareDetector::new(config, provider),
            settings,
            queue: queue.clone(),
            state: Mutex::new(ServiceState::Stopped),
            state_changed: Condvar::new(),
            worker: Mutex::new(None),
            session: Mutex::new(None),
            last_dispatched: Mutex::new(Command::tractor_stop(0)),
            connection_state: Mutex::new(ConnectionState::Disconnected),
            device_state: Mutex::new(None),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        queue.add_data_listener(Arc::new(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if *shared.state.lock() == ServiceState::Paused {
                if let Err(e) = shared.launch(true) {
                    tracing::error!("Failed to resume service: {}", e);
                }
            }
        }));

        Ok(Self { shared })
    }

    /// Start the worker; ignored unless stopped or paused
    pub fn start(&self) -> Result<()> {
        self.shared.launch(false)
    }

    /// Stop the worker, wait for it to exit and close the connection
    pub fn stop(&self) {
        let worker = {
            let mut state = self.shared.state.lock();
            match *state {
                ServiceState::Running => {
                    tracing::info!("Stopping service..");
                    *state = ServiceState::Stopping;
                    self.shared.state_changed.notify_all();
                    self.shared.worker.lock().take()
                }
                ServiceState::Paused => {
                    *state = ServiceState::Stopped;
                    self.shared.state_changed.notify_all();
                    None
                }
                ServiceState::Stopping | ServiceState::Stopped => None,
            }
        };

        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("Service thread panicked");
            }
        }
        if let Some(session) = self.shared.session.lock().take() {
            session.disconnect();
            self.shared.set_connection_state(ConnectionState::Disconnected);
        }
    }

    /// Stop, disconnect and detach every queue listener
    pub fn destroy(&self) {
        self.stop();
        self.shared.queue.remove_all_listeners();
        self.shared.set_connection_state(ConnectionState::Disconnected);
    }

    pub fn status(&self) -> ServiceState {
        *self.shared.state.lock()
    }

    /// Block until the service reaches `target` or `timeout` elapses
    pub fn wait_for(&self, target: ServiceState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while *state != target {
            if self
                .shared
                .state_changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return *state == target;
            }
        }
        true
    }

    pub fn command_queue(&self) -> Arc<CommandQueue> {
        self.shared.queue.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.connection_state.lock()
    }

    /// Telemetry as of the last refresh
    pub fn device_state(&self) -> Option<DeviceState> {
        self.shared.device_state.lock().clone()
    }

    /// Most recently dispatched command
    pub fn last_command(&self) -> Command {
        *self.shared.last_dispatched.lock()
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.shared.settings
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = Config::in_memory().with(keys::SERVICE_MAX_QUEUE_SIZE, "3");
        let settings = ServiceSettings::from_config(&config).unwrap();
        assert_eq!(settings.max_queue_size, 3);
        assert_eq!(settings.sleep_timeout, Duration::from_secs(60));
        assert_eq!(
            ServiceSettings::from_config(&Config::in_memory()).unwrap(),
            ServiceSettings::default()
        );
    }

    #[test]
    fn test_bypass_order() {
        let last = Command::vector(50, 0, 100);
        assert_eq!(
            bypass_reason(&last, &Command::vector(10, 0, 50), 0, 10),
            Some(Bypass::Stale)
        );
        assert_eq!(
            bypass_reason(&last, &Command::vector(50, 0, 200), 20, 10),
            Some(Bypass::Duplicate)
        );
        assert_eq!(
            bypass_reason(&last, &Command::vector(10, 0, 200), 11, 10),
            Some(Bypass::Backlog(11))
        );
        assert_eq!(bypass_reason(&last, &Command::vector(10, 0, 200), 10, 10), None);
        // Same timestamp is not stale
        assert_eq!(bypass_reason(&last, &Command::tractor(0, 0, 100), 0, 10), None);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ServiceState::Stopping.to_string(), "stopping..");
        assert_eq!(ServiceState::Paused.to_string(), "paused");
    }
}
