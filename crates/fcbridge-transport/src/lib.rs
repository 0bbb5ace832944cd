//! Transport implementations for fcbridge.
//!
//! Provides [`SerialTransport`], the concrete [`Transport`](fcbridge_core::Transport)
//! for a flight controller's USB virtual COM port, and [`list_ports`] for
//! picking the device.
//!
//! # Example
//!
//! ```no_run
//! use fcbridge_transport::{SerialTransport, list_ports};
//!
//! # async fn example() -> fcbridge_core::Result<()> {
//! let ports = list_ports()?;
//! let first = ports.first().expect("no serial ports");
//! let transport = SerialTransport::open(&first.name, 115_200).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{DEFAULT_BAUD_RATE, PortInfo, SerialConfig, SerialTransport, list_ports};
