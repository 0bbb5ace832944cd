//! Serial port transport for the flight-controller CLI.
//!
//! This module provides [`SerialTransport`], which implements the [`Transport`]
//! trait for the USB virtual COM port a flight controller presents when
//! plugged in (STM32 CDC/ACM, CP210x and CH340 bridges). The CLI runs at
//! 115200 baud, 8N1, which is what [`SerialConfig::default`] gives you.
//!
//! # Example
//!
//! ```no_run
//! use fcbridge_transport::SerialTransport;
//! use fcbridge_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> fcbridge_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyACM0", 115_200).await?;
//!
//! // Enter CLI mode
//! transport.send(b"#\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use fcbridge_core::error::{Error, Result};
use fcbridge_core::transport::Transport;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialPortType, SerialStream};

/// Baud rate of the flight-controller CLI.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial port configuration.
///
/// Data bits, stop bits and parity are fixed at 8N1; flight controllers do
/// not offer anything else on the CLI port.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate. USB CDC devices ignore it, UART bridges do not.
    pub baud_rate: u32,
    /// Use RTS/CTS hardware flow control (off for USB CDC devices).
    pub hardware_flow_control: bool,
    /// Assert DTR after opening. Some UART bridges hold the MCU in reset
    /// or gate their TX while DTR is low.
    pub assert_dtr: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            hardware_flow_control: false,
            assert_dtr: true,
        }
    }
}

/// A serial device found during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// OS path or name to pass to [`SerialTransport::open`].
    pub name: String,
    /// Human-readable description (USB product string when available).
    pub description: String,
}

/// List the serial ports present on this machine.
///
/// USB devices come first, since that is where a flight controller shows up.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| Error::Transport(format!("failed to enumerate serial ports: {e}")))?;

    let mut infos: Vec<(bool, PortInfo)> = ports
        .into_iter()
        .map(|p| {
            let (is_usb, description) = match p.port_type {
                SerialPortType::UsbPort(usb) => {
                    let product = usb.product.unwrap_or_else(|| "USB serial".to_string());
                    (true, format!("{product} ({:04x}:{:04x})", usb.vid, usb.pid))
                }
                SerialPortType::BluetoothPort => (false, "Bluetooth".to_string()),
                SerialPortType::PciPort => (false, "PCI".to_string()),
                SerialPortType::Unknown => (false, String::new()),
            };
            (
                is_usb,
                PortInfo {
                    name: p.port_name,
                    description,
                },
            )
        })
        .collect();

    infos.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
    Ok(infos.into_iter().map(|(_, info)| info).collect())
}

/// Serial port transport to a flight controller.
pub struct SerialTransport {
    port: Option<SerialStream>,
    port_name: String,
}

impl SerialTransport {
    /// Open `port` at `baud_rate`, 8N1, no flow control.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use fcbridge_transport::SerialTransport;
    /// # async fn example() -> fcbridge_core::Result<()> {
    /// let transport = SerialTransport::open("COM5", 115_200).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig {
            baud_rate,
            ..Default::default()
        };
        Self::open_with_config(port, config).await
    }

    /// Open a serial port with full configuration control.
    ///
    /// Fails with [`Error::Transport`] when the device does not exist, is
    /// held by another process, or permission is denied.
    pub async fn open_with_config(port: &str, config: SerialConfig) -> Result<Self> {
        tracing::debug!(
            port = %port,
            baud_rate = config.baud_rate,
            hardware_flow_control = config.hardware_flow_control,
            "Opening serial port"
        );

        let flow = if config.hardware_flow_control {
            tokio_serial::FlowControl::Hardware
        } else {
            tokio_serial::FlowControl::None
        };

        let mut stream = tokio_serial::new(port, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(flow)
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "Failed to open serial port");
                Error::Transport(format!("failed to open serial port {port}: {e}"))
            })?;

        if config.assert_dtr {
            if let Err(e) = stream.write_data_terminal_ready(true) {
                tracing::warn!(port = %port, error = %e, "Failed to assert DTR");
            }
        }

        tracing::info!(port = %port, baud_rate = config.baud_rate, "Serial port opened");

        Ok(Self {
            port: Some(stream),
            port_name: port.to_string(),
        })
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// Broken pipes and vanished devices mean the controller was unplugged or
/// rebooted; everything else is a plain I/O error.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(port = %self.port_name, bytes = data.len(), "Sending data");

        port.write_all(data).await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "Failed to send data");
            map_io_error(e)
        })?;
        port.flush().await.map_err(map_io_error)?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            Ok(Ok(0)) => {
                tracing::debug!(port = %self.port_name, "Serial stream ended");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(
                    port = %self.port_name,
                    bytes = n,
                    data = %String::from_utf8_lossy(&buf[..n]),
                    "Received data"
                );
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %self.port_name, error = %e, "Failed to receive data");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush().await {
                tracing::warn!(
                    port = %self.port_name,
                    error = %e,
                    "Failed to flush before closing (continuing anyway)"
                );
            }
            tracing::info!(port = %self.port_name, "Serial port closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_config_default_is_cli_rate() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert!(!config.hardware_flow_control);
        assert!(config.assert_dtr);
    }

    #[test]
    fn io_errors_map_to_connection_lost() {
        let e = map_io_error(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(matches!(e, Error::ConnectionLost));
        let e = map_io_error(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(matches!(e, Error::ConnectionLost));
    }

    #[test]
    fn other_io_errors_stay_io() {
        let e = map_io_error(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(matches!(e, Error::Io(_)));
    }

    #[tokio::test]
    async fn open_missing_port_is_transport_error() {
        let result = SerialTransport::open("/dev/fcbridge-no-such-port", 115_200).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
