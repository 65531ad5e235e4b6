//! Error surface of the serial crate.
//!
//! Decoding never fails (malformed input becomes a replacement glyph), and
//! teardown failures are logged rather than returned, so this enum is the
//! complete set of failures a caller can observe.

use serde::Serialize;

/// Remediation text attached to permission failures on `/dev` nodes.
pub const UNIX_PERMISSION_HINT: &str = "Your user is not allowed to open this device. \
Add yourself to the group that owns it (usually `dialout` on Debian/Ubuntu or `uucp` on \
Arch/Fedora), or install a udev rule granting access, then log out and back in.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SerialError {
    /// No device answers at the address.
    #[error("Serial port '{address}' not found")]
    PortUnavailable { address: String },

    /// The OS refused access to the device.
    #[error("Permission denied opening serial port '{address}'")]
    PermissionDenied {
        address: String,
        hint: Option<String>,
    },

    /// The driver refused the requested rate / framing combination.
    #[error("Serial port '{address}' rejected parameters {shorthand}: {message}")]
    ParameterRejected {
        address: String,
        shorthand: String,
        message: String,
    },

    /// The address is already held by another session or process.
    #[error("Serial port '{address}' is busy")]
    PortBusy { address: String },

    /// The port is open and its configuration is fixed until it closes.
    #[error("Serial port '{address}' is open; close it before changing its configuration")]
    ConfigLocked { address: String },

    /// Operation needs an open port.
    #[error("Serial port '{address}' is not open")]
    NotOpen { address: String },

    /// The session was disposed; nothing further is accepted.
    #[error("Serial session has been disposed")]
    PortClosed,

    #[error("Write to '{address}' failed: {message}")]
    Write { address: String, message: String },

    #[error("Read from '{address}' failed: {message}")]
    Read { address: String, message: String },

    #[error("Closing '{address}' failed: {message}")]
    Close { address: String, message: String },

    /// Any other transport failure.
    #[error("Serial I/O error on '{address}': {message}")]
    Io { address: String, message: String },
}

impl SerialError {
    /// Permission failure with the `/dev` remediation hint when the address
    /// looks like a Unix device node.
    pub fn permission_denied(address: impl Into<String>) -> Self {
        let address = address.into();
        let hint = address
            .starts_with("/dev")
            .then(|| UNIX_PERMISSION_HINT.to_string());
        Self::PermissionDenied { address, hint }
    }

    /// Mid-session I/O failures are treated like the device disappearing.
    pub fn is_presence_loss(&self) -> bool {
        matches!(
            self,
            Self::Write { .. } | Self::Read { .. } | Self::PortUnavailable { .. }
        )
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::PermissionDenied { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }
}

pub type SerialResult<T> = Result<T, SerialError>;
