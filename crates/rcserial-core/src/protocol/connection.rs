//! Connection management
//!
//! Owns one open port and the communicator bound to it: opens, validates the
//! firmware handshake, pauses/resumes the receive listener and tears down.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::communicator::{Communicator, CommunicatorSettings};
use super::serial::{PortProvider, PortSettings};
use super::verbs;
use crate::config::Config;
use crate::error::{DriverError, Result};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Detection in progress
    Probing,
    /// Validated port with a driver bound to it
    Connected,
    /// Link failed; the service will retry detection
    Error,
}

/// Port and communicator settings used for every connection attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub port: PortSettings,
    pub communicator: CommunicatorSettings,
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            port: PortSettings::from_config(config)?,
            communicator: CommunicatorSettings::from_config(config)?,
        })
    }
}

/// An open port with its communicator
pub struct Connection {
    port_name: String,
    communicator: Arc<Communicator>,
    firmware: Option<String>,
}

impl Connection {
    /// Open `port_name` and start listening on it
    pub fn open(
        provider: &dyn PortProvider,
        port_name: &str,
        settings: &ConnectionSettings,
    ) -> Result<Self> {
        let transport = provider.open(port_name, &settings.port)?;
        tracing::info!(
            "Port {} is available. Trying to work with it as Arduino.",
            port_name
        );
        let communicator = Arc::new(Communicator::new(transport, settings.communicator));
        communicator.init_listener()?;
        Ok(Self {
            port_name: port_name.to_string(),
            communicator,
            firmware: None,
        })
    }

    /// Ask for the firmware version and check its family prefix
    ///
    /// Returns the full version string on success.
    pub fn validate_firmware(&mut self, signature: &str) -> Result<String> {
        let answer = match self.communicator.send_command(verbs::VERSION) {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!("Version query on {} failed: {}", self.port_name, e);
                String::new()
            }
        };
        if !answer.starts_with(signature) {
            return Err(DriverError::SignatureMismatch {
                port: self.port_name.clone(),
                expected: signature.to_string(),
            });
        }
        tracing::info!("Port {} looks like {}", self.port_name, signature);
        tracing::info!("Detected: {}", answer);
        self.firmware = Some(answer.clone());
        Ok(answer)
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Firmware version captured by [`validate_firmware`](Self::validate_firmware)
    pub fn firmware(&self) -> Option<&str> {
        self.firmware.as_deref()
    }

    /// Shared handle for the driver bound to this connection
    pub fn communicator(&self) -> Arc<Communicator> {
        self.communicator.clone()
    }

    /// Suspend the receive listener
    pub fn pause(&self) {
        tracing::info!("Pause serial listener on {}", self.port_name);
        self.communicator.stop_listener();
    }

    /// Restart the receive listener after [`pause`](Self::pause)
    pub fn resume(&self) -> Result<()> {
        tracing::info!("Resume serial listener on {}", self.port_name);
        self.communicator.start_listener()
    }

    /// Stop the listener and close the port
    pub fn disconnect(self) {
        tracing::info!("Disconnecting {}", self.port_name);
        self.communicator.close();
    }
}
