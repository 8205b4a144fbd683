//! Error types for PWM drivers and servo configuration.

use std::io;

use thiserror::Error;

/// Errors returned by a [`PwmDriver`](crate::PwmDriver).
#[derive(Error, Debug)]
pub enum PwmError {
    /// Could not reach the PWM backend.
    #[error("Failed to connect to pigpiod at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Socket I/O failed mid-command.
    #[error("pigpiod I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backend rejected a command.
    #[error("{command} on pin {pin} failed with code {code}")]
    Command {
        command: &'static str,
        pin: u32,
        code: i32,
    },

    /// The driver was already stopped.
    #[error("PWM driver has been stopped")]
    Stopped,
}

/// Errors from validating a [`ServoConfig`](crate::ServoConfig).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidValue {
        field: &'static str,
        value: String,
        expected: String,
    },

    #[error("Invalid range for axis {axis}: {source}")]
    InvalidAxis {
        axis: &'static str,
        #[source]
        source: rdc_core::DomainError,
    },

    #[error("Axes x and y share pin {pin}")]
    SharedPin { pin: u32 },
}
