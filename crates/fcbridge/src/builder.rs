//! BridgeBuilder -- fluent builder for opening a [`Bridge`].
//!
//! Separates configuration from construction so that callers can set up
//! serial port parameters, the settle delay and timeouts before the port is
//! opened and the IO task starts.
//!
//! # Example
//!
//! ```no_run
//! use fcbridge::BridgeBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> fcbridge::Result<()> {
//! let bridge = BridgeBuilder::new()
//!     .serial_port("/dev/ttyACM0")
//!     .command_timeout(Duration::from_secs(2))
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use fcbridge_core::error::{Error, Result};
use fcbridge_core::transport::Transport;
use fcbridge_io::io::{IoConfig, PromptMatch, spawn_channel};
use fcbridge_io::log::SessionLog;
use fcbridge_transport::{SerialConfig, SerialTransport};

use crate::bridge::Bridge;

/// First line of every session log.
pub const CONNECTED_NOTICE: &str = "Connected to controller.";

/// Fluent builder for [`Bridge`].
///
/// Every setting has a default that works for a Betaflight controller on
/// USB, so the simplest usage is:
///
/// ```ignore
/// let bridge = BridgeBuilder::new()
///     .serial_port("/dev/ttyACM0")
///     .build()
///     .await?;
/// ```
pub struct BridgeBuilder {
    serial_port: Option<String>,
    serial: SerialConfig,
    io: IoConfig,
    event_capacity: usize,
}

impl BridgeBuilder {
    pub fn new() -> Self {
        BridgeBuilder {
            serial_port: None,
            serial: SerialConfig::default(),
            io: IoConfig::default(),
            event_capacity: 256,
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyACM0` or `COM5`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the baud rate (default: 115200).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.serial.baud_rate = baud;
        self
    }

    /// Enable RTS/CTS flow control (default: off).
    pub fn hardware_flow_control(mut self, enabled: bool) -> Self {
        self.serial.hardware_flow_control = enabled;
        self
    }

    /// Pause between opening the port and entering CLI mode (default: 300ms).
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.io.settle_delay = delay;
        self
    }

    /// Line written to enter CLI mode, or `None` when the controller is
    /// already in it (default: `#`).
    pub fn mode_entry(mut self, line: Option<&str>) -> Self {
        self.io.mode_entry = line.map(str::to_string);
        self
    }

    /// Set how long `send_and_await` waits for the prompt (default: 5s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.io.command_timeout = timeout;
        self
    }

    /// How long the line must stay silent after a timed-out command before
    /// the next one is written, unless its prompt shows up first (default: 1s).
    pub fn resync_quiet(mut self, quiet: Duration) -> Self {
        self.io.resync_quiet = quiet;
        self
    }

    /// Set how the prompt is recognised (default: at line start).
    pub fn prompt_match(mut self, mode: PromptMatch) -> Self {
        self.io.prompt_match = mode;
        self
    }

    /// Longest unterminated line kept before resyncing (default: 8192).
    pub fn max_line(mut self, bytes: usize) -> Self {
        self.io.max_line = bytes;
        self
    }

    /// Number of events a slow subscriber may fall behind by (default: 256).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Start a [`Bridge`] on a caller-provided transport.
    ///
    /// This is the entry point for tests (pass a `MockTransport` from
    /// `fcbridge-test-harness`) and for callers that open the link
    /// themselves.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Bridge> {
        if self.io.command_timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "command_timeout must be greater than zero".into(),
            ));
        }
        if self.io.max_line == 0 {
            return Err(Error::InvalidParameter(
                "max_line must be greater than zero".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidParameter(
                "event_capacity must be greater than zero".into(),
            ));
        }

        let log = Arc::new(SessionLog::new());
        log.push(CONNECTED_NOTICE);

        let (event_tx, _) = broadcast::channel(self.event_capacity);
        let channel = spawn_channel(transport, self.io, log.clone(), event_tx.clone());

        Ok(Bridge::new(channel, log, event_tx))
    }

    /// Open the serial port and start a [`Bridge`] on it.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    pub async fn build(self) -> Result<Bridge> {
        let port = self
            .serial_port
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter("serial_port is required for build()".into()))?;

        let transport = SerialTransport::open_with_config(port, self.serial.clone()).await?;
        self.build_with_transport(Box::new(transport)).await
    }
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcbridge_core::ChannelState;
    use fcbridge_test_harness::MockTransport;

    fn quick() -> BridgeBuilder {
        BridgeBuilder::new().settle_delay(Duration::from_millis(1))
    }

    #[test]
    fn builder_defaults() {
        let builder = BridgeBuilder::new();
        assert_eq!(builder.serial.baud_rate, 115_200);
        assert_eq!(builder.io.settle_delay, Duration::from_millis(300));
        assert_eq!(builder.io.command_timeout, Duration::from_secs(5));
        assert_eq!(builder.io.prompt_match, PromptMatch::LineStart);
        assert!(builder.serial_port.is_none());
    }

    #[test]
    fn builder_setters() {
        let builder = BridgeBuilder::new()
            .serial_port("COM5")
            .baud_rate(57_600)
            .command_timeout(Duration::from_secs(1))
            .prompt_match(PromptMatch::Anywhere)
            .resync_quiet(Duration::from_millis(250))
            .mode_entry(None);
        assert_eq!(builder.serial_port.as_deref(), Some("COM5"));
        assert_eq!(builder.serial.baud_rate, 57_600);
        assert_eq!(builder.io.command_timeout, Duration::from_secs(1));
        assert_eq!(builder.io.prompt_match, PromptMatch::Anywhere);
        assert_eq!(builder.io.resync_quiet, Duration::from_millis(250));
        assert!(builder.io.mode_entry.is_none());
    }

    #[tokio::test]
    async fn build_without_port_fails() {
        let result = BridgeBuilder::new().build().await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn build_with_missing_device_fails() {
        let result = BridgeBuilder::new()
            .serial_port("/dev/fcbridge-no-such-port")
            .build()
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn zero_timeout_rejected() {
        let result = quick()
            .command_timeout(Duration::ZERO)
            .build_with_transport(Box::new(MockTransport::new()))
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn build_with_transport_enters_cli_mode() {
        let mut mock = MockTransport::new();
        mock.expect(b"#\n", b"\r\nEntering CLI Mode\r\n# ");
        let sent = mock.sent_log();

        let bridge = quick().build_with_transport(Box::new(mock)).await.unwrap();
        bridge.wait_ready().await.unwrap();

        assert_eq!(bridge.state(), ChannelState::Ready);
        assert_eq!(sent.lines(), vec!["#\n"]);
        assert_eq!(
            bridge.log().lines(),
            vec![CONNECTED_NOTICE, "Sent: #", "", "Entering CLI Mode", "# "]
        );
        bridge.close().await;
    }
}
