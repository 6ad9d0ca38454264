/// Errors that can occur in link transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the serial device.
    #[error("failed to open {port} at {baud_rate} baud: {source}")]
    Open {
        port: String,
        baud_rate: u32,
        source: serialport::Error,
    },

    /// Failed to enumerate serial devices.
    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(serialport::Error),

    /// An I/O error occurred on the link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link has been closed.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// True when the OS refused access to the device.
    pub fn is_permission_denied(&self) -> bool {
        let kind = match self {
            TransportError::Open { source, .. } | TransportError::Enumerate(source) => {
                source.kind()
            }
            TransportError::Io(err) => return err.kind() == std::io::ErrorKind::PermissionDenied,
            TransportError::Closed => return false,
        };
        kind == serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied)
    }
}

impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        TransportError::Io(err.into())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_detected_through_serialport_errors() {
        let err = TransportError::Open {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 115_200,
            source: serialport::Error::new(
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
                "Permission denied",
            ),
        };
        assert!(err.is_permission_denied());

        let err = TransportError::Open {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 115_200,
            source: serialport::Error::new(serialport::ErrorKind::NoDevice, "gone"),
        };
        assert!(!err.is_permission_denied());
        assert!(!TransportError::Closed.is_permission_denied());
    }
}
