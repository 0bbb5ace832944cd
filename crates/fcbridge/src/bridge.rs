//! Bridge -- an open CLI session with a flight controller.
//!
//! Ties the command channel to the session log and the event stream, and
//! runs settings verification over the same channel. Constructed via
//! [`BridgeBuilder`](crate::builder::BridgeBuilder).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use fcbridge_core::error::{Error, Result};
use fcbridge_core::events::{BridgeEvent, ChannelState};
use fcbridge_core::transport::Transport;
use fcbridge_io::io::CliChannel;
use fcbridge_io::log::SessionLog;
use fcbridge_verify::{Expectation, VerificationReport, VerificationResult, extract_value};

/// A connected flight controller in CLI mode.
pub struct Bridge {
    channel: CliChannel,
    log: Arc<SessionLog>,
    event_tx: broadcast::Sender<BridgeEvent>,
}

impl Bridge {
    pub(crate) fn new(
        channel: CliChannel,
        log: Arc<SessionLog>,
        event_tx: broadcast::Sender<BridgeEvent>,
    ) -> Self {
        Bridge {
            channel,
            log,
            event_tx,
        }
    }

    /// Wait until the controller has answered mode entry with its prompt, or
    /// the command timeout passed without one.
    ///
    /// Fails with [`Error::NotConnected`] if the channel closed first.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut states = self.channel.state_changes();
        let state = states
            .wait_for(|s| *s != ChannelState::Disconnected && *s != ChannelState::Connecting)
            .await
            .map_err(|_| Error::NotConnected)?;
        if *state == ChannelState::Closed {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Subscribe to device output and session events.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.event_tx.subscribe()
    }

    /// Write a line without waiting for the response. Its output shows up in
    /// the log and on the event stream.
    pub async fn send(&self, line: &str) {
        self.channel.send(line).await;
    }

    /// Write a line and return the response block up to the next prompt.
    pub async fn send_and_await(&self, line: &str) -> Result<String> {
        self.channel.send_and_await(line).await
    }

    /// [`send_and_await`](Self::send_and_await) with a one-off deadline.
    pub async fn send_and_await_with_timeout(&self, line: &str, timeout: Duration) -> Result<String> {
        self.channel.send_and_await_with_timeout(line, timeout).await
    }

    /// Read one setting with `get <name>`.
    ///
    /// Returns `Ok(None)` when the controller's answer carries no value, as
    /// it does for an unknown setting name.
    pub async fn get_setting(&self, name: &str) -> Result<Option<String>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidParameter("setting name is blank".into()));
        }
        let response = self.send_and_await(&format!("get {name}")).await?;
        Ok(extract_value(&response))
    }

    /// Check every expectation in order. The run is also recorded in the
    /// session log, one line per result.
    pub async fn verify(&self, expectations: &[Expectation]) -> Result<VerificationReport> {
        self.verify_with(expectations, |_| {}).await
    }

    /// Like [`verify`](Self::verify), handing each result to `observer` as
    /// soon as it is known.
    pub async fn verify_with<F>(
        &self,
        expectations: &[Expectation],
        mut observer: F,
    ) -> Result<VerificationReport>
    where
        F: FnMut(&VerificationResult) + Send,
    {
        info!(entries = expectations.len(), "verifying settings");
        let log = &self.log;
        let results = fcbridge_verify::verify_with(&self.channel, expectations, |result| {
            log.push(result.to_string());
            observer(result);
        })
        .await?;

        let report = VerificationReport::new(results);
        info!(
            passed = report.passed(),
            failed = report.failed(),
            errors = report.errors(),
            "verification finished"
        );
        Ok(report)
    }

    /// The session log.
    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    /// Add a status line to the session log.
    pub fn notice(&self, text: &str) {
        self.log.push(text);
    }

    pub fn clear_log(&self) {
        self.log.clear();
    }

    /// The session log as plain text, one line per entry.
    pub fn export_log(&self) -> String {
        self.log.export_text()
    }

    /// Write the session log to `path`.
    pub fn save_log(&self, path: impl AsRef<Path>) -> Result<()> {
        self.log.save_to(path)
    }

    /// Stop the IO task and close the port.
    ///
    /// No `exit` is sent: on Betaflight that reboots the controller.
    pub async fn close(&self) {
        debug!("closing bridge");
        self.channel.close().await;
    }

    /// Stop after queued commands are written and hand back the transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        self.channel.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BridgeBuilder, CONNECTED_NOTICE};
    use fcbridge_test_harness::MockTransport;
    use fcbridge_verify::{SettingValue, Status, parse_expectations};

    async fn open(mock: MockTransport) -> Bridge {
        let bridge = BridgeBuilder::new()
            .settle_delay(Duration::from_millis(1))
            .command_timeout(Duration::from_millis(500))
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        bridge.wait_ready().await.unwrap();
        bridge
    }

    const BANNER: &[u8] = b"\r\nEntering CLI Mode\r\n# ";

    fn cli_mock() -> MockTransport {
        let mut mock = MockTransport::new();
        mock.expect(b"#\n", BANNER);
        mock
    }

    fn entries_a1_b2() -> Vec<Expectation> {
        vec![
            Expectation::equal("a", SettingValue::Text("1".into())),
            Expectation::equal("b", SettingValue::Text("2".into())),
        ]
    }

    #[tokio::test]
    async fn get_setting_reads_value() {
        let mut mock = cli_mock();
        mock.expect(b"get min_throttle\n", b"min_throttle = 1070\r\n\r\n# ");
        mock.expect(b"get nope\n", b"Invalid name\r\n\r\n# ");
        let bridge = open(mock).await;

        assert_eq!(
            bridge.get_setting("min_throttle").await.unwrap().as_deref(),
            Some("1070")
        );
        assert_eq!(bridge.get_setting("nope").await.unwrap(), None);
        bridge.close().await;
    }

    #[tokio::test]
    async fn get_setting_rejects_blank_name() {
        let bridge = open(cli_mock()).await;
        let result = bridge.get_setting(" ").await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
        bridge.close().await;
    }

    #[tokio::test]
    async fn verify_against_controller() {
        let mut mock = cli_mock();
        mock.expect(b"get min_throttle\n", b"min_throttle = 1070\r\n\r\n# ");
        mock.expect_chunked(b"get foo\n", &[b"foo = ", b"5\n", b"#"]);
        mock.expect(b"get bar\n", b"Invalid name\r\n# ");
        let bridge = open(mock).await;

        let entries = parse_expectations(
            r#"[
                {"name": "min_throttle", "action": "=", "value": "1070"},
                {"name": "foo", "action": "!=", "value": "5"},
                {"name": "bar", "action": "=", "value": 1}
            ]"#,
        )
        .unwrap();

        let mut streamed = Vec::new();
        let report = bridge
            .verify_with(&entries, |r| streamed.push(r.status))
            .await
            .unwrap();

        assert_eq!(streamed, vec![Status::Pass, Status::Fail, Status::Error]);
        assert_eq!(report.results[0].actual_value.as_deref(), Some("1070"));
        assert_eq!(report.passed(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.errors(), 1);

        let log = bridge.log().lines();
        assert!(log.contains(&"Setting: foo, Status: fail, Actual: 5, Expected: 5".to_string()));
        bridge.close().await;
    }

    #[tokio::test]
    async fn verify_right_after_slow_mode_entry() {
        let mut mock = MockTransport::new();
        mock.expect_delayed(b"#\n", Duration::from_millis(30), BANNER);
        mock.expect_delayed(b"get a\n", Duration::from_millis(30), b"a = 1\r\n# ");
        mock.expect_delayed(b"get b\n", Duration::from_millis(30), b"b = 2\r\n# ");
        let bridge = open(mock).await;

        let report = bridge.verify(&entries_a1_b2()).await.unwrap();
        assert_eq!(report.passed(), 2, "{report}");
        assert_eq!(report.results[1].actual_value.as_deref(), Some("2"));
        bridge.close().await;
    }

    #[tokio::test]
    async fn verify_after_late_reply_grades_each_setting() {
        let mut mock = cli_mock();
        mock.expect_delayed(b"get a\n", Duration::from_millis(300), b"a = 1\r\n# ");
        mock.expect_delayed(b"get b\n", Duration::from_millis(30), b"b = 2\r\n# ");
        let bridge = BridgeBuilder::new()
            .settle_delay(Duration::from_millis(1))
            .command_timeout(Duration::from_millis(200))
            .resync_quiet(Duration::from_millis(200))
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        bridge.wait_ready().await.unwrap();

        let report = bridge.verify(&entries_a1_b2()).await.unwrap();
        assert_eq!(report.results[0].status, Status::Error);
        assert_eq!(report.results[1].status, Status::Pass);
        assert_eq!(report.results[1].actual_value.as_deref(), Some("2"));
        assert!(bridge.log().lines().contains(&"a = 1".to_string()));
        bridge.close().await;
    }

    #[tokio::test]
    async fn verify_aborts_when_controller_goes_away() {
        let mut mock = cli_mock();
        mock.expect(b"get a\n", b"a = 1\r\n# ");
        mock.expect_then_end(b"get b\n", b"");
        let bridge = open(mock).await;

        let entries = vec![
            Expectation::equal("a", SettingValue::Text("1".into())),
            Expectation::equal("b", SettingValue::Text("2".into())),
            Expectation::equal("c", SettingValue::Text("3".into())),
        ];
        let result = bridge.verify(&entries).await;
        assert!(matches!(result, Err(Error::ConnectionLost)));
        assert_eq!(bridge.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn log_records_session_and_exports() {
        let mut mock = cli_mock();
        mock.expect(b"status\n", b"");
        let bridge = open(mock).await;
        let mut events = bridge.subscribe();

        bridge.send("status").await;
        loop {
            match events.recv().await.unwrap() {
                BridgeEvent::Sent(line) if line == "status" => break,
                _ => continue,
            }
        }
        bridge.notice("Checking done.");

        let text = bridge.export_log();
        assert!(text.starts_with(&format!("{CONNECTED_NOTICE}\nSent: #\n")));
        assert!(text.ends_with("Sent: status\nChecking done.\n"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.txt");
        bridge.save_log(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), text);

        bridge.clear_log();
        assert!(bridge.log().is_empty());
        bridge.close().await;
    }

    #[tokio::test]
    async fn close_then_send_is_not_connected() {
        let bridge = open(cli_mock()).await;
        bridge.close().await;

        assert_eq!(bridge.state(), ChannelState::Closed);
        let result = bridge.send_and_await("get foo").await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert!(matches!(bridge.wait_ready().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn shutdown_returns_transport() {
        let bridge = open(cli_mock()).await;
        let transport = bridge.shutdown().await.unwrap();
        assert!(transport.is_connected());
    }
}
