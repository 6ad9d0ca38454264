use std::io::{Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort, SerialPortType};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{Transport, MIN_LINK_TIMEOUT};

/// Baud rate the camera firmware configures on its UART.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Timeout applied at open, before any per-operation timeout is set.
const OPEN_TIMEOUT: Duration = Duration::from_secs(1);

/// Serial port transport.
///
/// Owns the OS handle; dropping the transport closes the port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
    baud_rate: u32,
}

impl SerialTransport {
    /// Open a serial device (e.g. `/dev/ttyUSB0`, `COM3`).
    pub fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let handle = serialport::new(port, baud_rate)
            .timeout(OPEN_TIMEOUT)
            .open()
            .map_err(|source| TransportError::Open {
                port: port.to_string(),
                baud_rate,
                source,
            })?;

        info!(port, baud_rate, "opened serial port");

        Ok(Self {
            port: handle,
            name: port.to_string(),
            baud_rate,
        })
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port
            .set_timeout(timeout.max(MIN_LINK_TIMEOUT))
            .map_err(Into::into)
    }

    fn discard_input(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial:{}@{}", self.name, self.baud_rate)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        debug!(port = %self.name, "closing serial port");
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .field("baud_rate", &self.baud_rate)
            .finish()
    }
}

/// One serial device found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSummary {
    pub name: String,
    pub kind: &'static str,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub product: Option<String>,
}

/// Enumerate serial devices present on the host.
pub fn available_ports() -> Result<Vec<PortSummary>> {
    let ports = serialport::available_ports().map_err(TransportError::Enumerate)?;
    Ok(ports
        .into_iter()
        .map(|info| match info.port_type {
            SerialPortType::UsbPort(usb) => PortSummary {
                name: info.port_name,
                kind: "usb",
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            SerialPortType::PciPort => PortSummary {
                name: info.port_name,
                kind: "pci",
                vid: None,
                pid: None,
                product: None,
            },
            SerialPortType::BluetoothPort => PortSummary {
                name: info.port_name,
                kind: "bluetooth",
                vid: None,
                pid: None,
                product: None,
            },
            SerialPortType::Unknown => PortSummary {
                name: info.port_name,
                kind: "unknown",
                vid: None,
                pid: None,
                product: None,
            },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_device_reports_port() {
        let missing = format!("/dev/sortgate-missing-{}", std::process::id());
        let err = SerialTransport::open(&missing, DEFAULT_BAUD_RATE).unwrap_err();

        match err {
            TransportError::Open {
                port, baud_rate, ..
            } => {
                assert_eq!(port, missing);
                assert_eq!(baud_rate, DEFAULT_BAUD_RATE);
            }
            other => panic!("expected open error, got {other:?}"),
        }
    }

    #[test]
    fn open_error_message_names_device() {
        let err = SerialTransport::open("/dev/sortgate-nope", 9600).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("/dev/sortgate-nope"));
        assert!(msg.contains("9600"));
    }
}
