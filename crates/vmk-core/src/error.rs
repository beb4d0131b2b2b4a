//! Error types shared by every layer of the spectrometer driver.
//!
//! The taxonomy separates hard failures (protocol violations, device-reported
//! failures, timeouts, corrupted frame headers) from configuration-class
//! problems that a caller can fix and retry. Soft diagnostics such as a
//! dark-signal exposure mismatch are not errors at all; they are reported as
//! warning values by the spectrometer layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("Protocol mismatch: {message}")]
    ProtocolMismatch { message: String },

    #[error("Device reported failure status 0x{code:02X} for command 0x{command:04X}")]
    DeviceFailure { code: u16, command: u16 },

    #[error("Device read timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Invalid measurement header on line {line}")]
    InvalidHeader { line: usize },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Exposure mismatch: {left}ms and {right}ms")]
    ExposureMismatch { left: u32, right: u32 },

    #[error("Spectrometer is not configured: {missing}")]
    NotConfigured { missing: String },

    // Device lifecycle errors
    #[error("Device is closed")]
    DeviceClosed,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("USB error: {0}")]
    Usb(String),

    #[error("Acquisition task failed: {0}")]
    Task(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a protocol mismatch error (magic, sequence, opcode or length).
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolMismatch {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a timeout error from a duration.
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Create a shape mismatch error.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create a "not configured" error naming what is missing.
    pub fn not_configured(missing: impl Into<String>) -> Self {
        Self::NotConfigured {
            missing: missing.into(),
        }
    }

    /// Create a USB error.
    pub fn usb(message: impl Into<String>) -> Self {
        Self::Usb(message.into())
    }

    /// Returns `true` for configuration-class errors.
    ///
    /// These leave the device in a usable state: the caller can adjust the
    /// configuration and retry. Everything else aborts the current exchange.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::ShapeMismatch { .. }
                | Self::ExposureMismatch { .. }
                | Self::NotConfigured { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
