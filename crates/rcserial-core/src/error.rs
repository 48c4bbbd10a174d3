//! Driver errors

use thiserror::Error;

/// Errors that can occur while talking to the chassis
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Port {0} is already in use")]
    PortInUse(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Answer timeout expired for command '{command}' after {timeout_ms}ms")]
    AnswerTimeout { command: String, timeout_ms: u64 },

    #[error("There is no device with firmware signature '{expected}' on {port}")]
    SignatureMismatch { port: String, expected: String },

    #[error("Unable to detect device on any port")]
    DeviceNotFound,

    #[error("Invalid answer to '{command}': '{value}'")]
    InvalidTelemetry { command: String, value: String },

    #[error("Not connected to device")]
    NotConnected,

    #[error("Unsupported hardware: {0}")]
    UnsupportedHardware(String),

    #[error("Invalid configuration value for '{key}': '{value}'")]
    InvalidConfig { key: String, value: String },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Recovery class of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The link failed; reconnecting may help
    Transport,
    /// The device answered but is not something this driver can run
    UnsupportedHardware,
    /// Anything a retry cannot fix
    Fatal,
}

impl DriverError {
    /// Classify the error for the service's recovery policy
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::UnsupportedHardware(_) => ErrorKind::UnsupportedHardware,
            DriverError::InvalidConfig { .. } => ErrorKind::Fatal,
            _ => ErrorKind::Transport,
        }
    }

    /// True for transport failures the reconnect loop handles
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

impl From<serialport::Error> for DriverError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => DriverError::PortNotFound(e.description),
            _ => DriverError::SerialError(e.to_string()),
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DriverError::UnsupportedHardware("Arduino4WD".into()).kind(),
            ErrorKind::UnsupportedHardware
        );
        assert!(DriverError::DeviceNotFound.is_transport());
        assert!(DriverError::AnswerTimeout {
            command: "Version".into(),
            timeout_ms: 10
        }
        .is_transport());
        assert_eq!(
            DriverError::InvalidConfig {
                key: "SerialService.MaxQueueSize".into(),
                value: "ten".into()
            }
            .kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = DriverError::AnswerTimeout {
            command: "Hardware".into(),
            timeout_ms: 2000,
        };
        assert!(err.to_string().contains("Answer timeout expired"));
        assert!(err.to_string().contains("Hardware"));
    }
}
