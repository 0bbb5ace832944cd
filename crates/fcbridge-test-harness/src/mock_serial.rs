//! Mock transport for deterministic testing of the CLI bridge.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! command/response pairs, so tests can drive the command channel and the
//! settings verifier the way a real controller would: echo, response lines,
//! a trailing `# ` prompt, all split into whatever chunks the test wants.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use fcbridge_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the channel writes this line, the controller answers with these chunks.
//! mock.expect_chunked(b"get min_throttle\n", &[b"min_throttle = 10", b"70\r\n\r\n# "]);
//!
//! // A slow controller: the answer shows up 30ms after the write.
//! mock.expect_delayed(
//!     b"get motor_pwm_protocol\n",
//!     Duration::from_millis(30),
//!     b"motor_pwm_protocol = DSHOT600\r\n# ",
//! );
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fcbridge_core::error::{Error, Result};
use fcbridge_core::transport::Transport;

/// A pre-loaded request/response pair.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be written.
    request: Vec<u8>,
    /// Queued for `receive()` once the request is written.
    reply: Vec<Inbound>,
}

/// One queued `receive()` outcome.
#[derive(Debug, Clone)]
enum Inbound {
    Data(Vec<u8>),
    /// Silence for this long, counted from the first `receive()` that sees it.
    Pause(Duration),
    /// A pause that has started.
    PauseUntil(Instant),
    End,
}

fn data_chunks<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<Inbound> {
    chunks
        .into_iter()
        .filter(|c| !c.is_empty())
        .map(|c| Inbound::Data(c.to_vec()))
        .collect()
}

/// Shared record of every write made through a [`MockTransport`].
///
/// The mock is usually moved into an IO task, so tests keep a clone of this
/// handle to inspect what was written.
#[derive(Debug, Clone, Default)]
pub struct SentLog {
    inner: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl SentLog {
    fn push(&self, data: &[u8]) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(data.to_vec());
    }

    /// Every write, in order, one element per `send()` call.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every write decoded as text.
    pub fn lines(&self) -> Vec<String> {
        self.writes()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }
}

/// A mock [`Transport`] standing in for a flight controller.
///
/// Expectations are consumed in order. When `send()` is called, the written
/// bytes are recorded and matched against the next expectation; its response
/// chunks are then handed out by subsequent `receive()` calls, one chunk per
/// call (split further if the caller's buffer is smaller).
///
/// With nothing queued, or while a scripted pause runs, `receive()` returns
/// [`Error::Timeout`] immediately.
/// Once a scripted end-of-stream is reached it returns
/// [`Error::ConnectionLost`] from then on.
#[derive(Debug)]
pub struct MockTransport {
    expectations: VecDeque<Expectation>,
    inbound: VecDeque<Inbound>,
    ended: bool,
    connected: bool,
    sent: SentLog,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            inbound: VecDeque::new(),
            ended: false,
            connected: true,
            sent: SentLog::default(),
        }
    }

    /// When `request` is written, answer with `response` as a single chunk.
    ///
    /// An empty `response` scripts a device that stays silent.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.push_expectation(request, data_chunks([response]));
    }

    /// Like [`expect`](Self::expect), then end the stream, as a controller
    /// does when it reboots after `save` or `exit`.
    pub fn expect_then_end(&mut self, request: &[u8], response: &[u8]) {
        let mut reply = data_chunks([response]);
        reply.push(Inbound::End);
        self.push_expectation(request, reply);
    }

    /// When `request` is written, answer with `chunks`, one per `receive()`.
    pub fn expect_chunked(&mut self, request: &[u8], chunks: &[&[u8]]) {
        self.push_expectation(request, data_chunks(chunks.iter().copied()));
    }

    /// When `request` is written, stay silent for `delay`, then answer with
    /// `response`.
    pub fn expect_delayed(&mut self, request: &[u8], delay: Duration, response: &[u8]) {
        let mut reply = vec![Inbound::Pause(delay)];
        reply.extend(data_chunks([response]));
        self.push_expectation(request, reply);
    }

    fn push_expectation(&mut self, request: &[u8], reply: Vec<Inbound>) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            reply,
        });
    }

    /// Queue unsolicited device output, available before any write.
    pub fn push_output(&mut self, chunk: &[u8]) {
        self.inbound.push_back(Inbound::Data(chunk.to_vec()));
    }

    /// Queue a stretch of silence between unsolicited chunks.
    pub fn push_pause(&mut self, delay: Duration) {
        self.inbound.push_back(Inbound::Pause(delay));
    }

    /// End the stream once all output queued so far has been delivered.
    pub fn end_stream(&mut self) {
        self.inbound.push_back(Inbound::End);
    }

    /// Handle to the record of writes, usable after the mock is moved.
    pub fn sent_log(&self) -> SentLog {
        self.sent.clone()
    }

    /// All data written through this transport so far.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.sent.writes()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.sent.push(data);

        match self.expectations.pop_front() {
            Some(expectation) if data == expectation.request.as_slice() => {
                self.inbound.extend(expectation.reply);
                Ok(())
            }
            Some(expectation) => Err(Error::Protocol(format!(
                "unexpected write: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expectation.request),
                String::from_utf8_lossy(data)
            ))),
            None => Err(Error::Protocol(format!(
                "no more expectations in mock transport (got {:?})",
                String::from_utf8_lossy(data)
            ))),
        }
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        if self.ended {
            return Err(Error::ConnectionLost);
        }

        let mut chunk = loop {
            match self.inbound.pop_front() {
                Some(Inbound::Data(chunk)) => break chunk,
                Some(Inbound::Pause(delay)) => {
                    self.inbound
                        .push_front(Inbound::PauseUntil(Instant::now() + delay));
                    return Err(Error::Timeout);
                }
                Some(Inbound::PauseUntil(until)) if Instant::now() < until => {
                    self.inbound.push_front(Inbound::PauseUntil(until));
                    return Err(Error::Timeout);
                }
                Some(Inbound::PauseUntil(_)) => continue,
                Some(Inbound::End) => {
                    self.ended = true;
                    return Err(Error::ConnectionLost);
                }
                None => return Err(Error::Timeout),
            }
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            let rest = chunk.split_off(n);
            self.inbound.push_front(Inbound::Data(rest));
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.inbound.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn recv(mock: &mut MockTransport, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await?;
        buf.truncate(n);
        Ok(buf)
    }

    #[tokio::test]
    async fn mock_transport_basic_send_receive() {
        let mut mock = MockTransport::new();
        mock.expect(b"get foo\n", b"foo = 5\r\n# ");

        mock.send(b"get foo\n").await.unwrap();
        assert_eq!(recv(&mut mock, 64).await.unwrap(), b"foo = 5\r\n# ");
    }

    #[tokio::test]
    async fn mock_transport_chunks_delivered_one_per_receive() {
        let mut mock = MockTransport::new();
        mock.expect_chunked(b"version\n", &[b"# Beta", b"flight\r\n", b"# "]);

        mock.send(b"version\n").await.unwrap();
        assert_eq!(recv(&mut mock, 64).await.unwrap(), b"# Beta");
        assert_eq!(recv(&mut mock, 64).await.unwrap(), b"flight\r\n");
        assert_eq!(recv(&mut mock, 64).await.unwrap(), b"# ");
        assert!(matches!(recv(&mut mock, 64).await, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn mock_transport_small_buffer_splits_chunk() {
        let mut mock = MockTransport::new();
        mock.push_output(b"ABCD");

        assert_eq!(recv(&mut mock, 3).await.unwrap(), b"ABC");
        assert_eq!(recv(&mut mock, 3).await.unwrap(), b"D");
    }

    #[tokio::test]
    async fn mock_transport_tracks_sent_data() {
        let mut mock = MockTransport::new();
        mock.expect(b"#\n", b"");
        mock.expect(b"status\n", b"");
        let log = mock.sent_log();

        mock.send(b"#\n").await.unwrap();
        mock.send(b"status\n").await.unwrap();

        assert_eq!(mock.sent_data().len(), 2);
        assert_eq!(log.lines(), vec!["#\n".to_string(), "status\n".to_string()]);
    }

    #[tokio::test]
    async fn mock_transport_wrong_data_errors() {
        let mut mock = MockTransport::new();
        mock.expect(b"get foo\n", b"foo = 1\r\n# ");

        let result = mock.send(b"get bar\n").await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn mock_transport_no_expectations_errors() {
        let mut mock = MockTransport::new();
        let result = mock.send(b"save\n").await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn mock_transport_end_of_stream_after_output() {
        let mut mock = MockTransport::new();
        mock.push_output(b"Rebooting\r\n");
        mock.end_stream();

        assert_eq!(recv(&mut mock, 64).await.unwrap(), b"Rebooting\r\n");
        assert!(matches!(recv(&mut mock, 64).await, Err(Error::ConnectionLost)));
        assert!(matches!(recv(&mut mock, 64).await, Err(Error::ConnectionLost)));
    }

    #[tokio::test]
    async fn mock_transport_end_after_response() {
        let mut mock = MockTransport::new();
        mock.expect_then_end(b"save\n", b"Saving\r\nRebooting");

        assert!(matches!(recv(&mut mock, 64).await, Err(Error::Timeout)));
        mock.send(b"save\n").await.unwrap();
        assert_eq!(recv(&mut mock, 64).await.unwrap(), b"Saving\r\nRebooting");
        assert!(matches!(recv(&mut mock, 64).await, Err(Error::ConnectionLost)));
    }

    #[tokio::test]
    async fn mock_transport_delayed_reply_stays_silent_first() {
        let mut mock = MockTransport::new();
        mock.expect_delayed(b"get a\n", Duration::from_millis(30), b"a = 1\r\n# ");

        mock.send(b"get a\n").await.unwrap();
        assert!(matches!(recv(&mut mock, 64).await, Err(Error::Timeout)));
        assert!(matches!(recv(&mut mock, 64).await, Err(Error::Timeout)));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(recv(&mut mock, 64).await.unwrap(), b"a = 1\r\n# ");
    }

    #[tokio::test]
    async fn mock_transport_pause_between_unsolicited_chunks() {
        let mut mock = MockTransport::new();
        mock.push_output(b"Armed\r\n");
        mock.push_pause(Duration::from_millis(20));
        mock.push_output(b"Disarmed\r\n");

        assert_eq!(recv(&mut mock, 64).await.unwrap(), b"Armed\r\n");
        assert!(matches!(recv(&mut mock, 64).await, Err(Error::Timeout)));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(recv(&mut mock, 64).await.unwrap(), b"Disarmed\r\n");
    }

    #[tokio::test]
    async fn mock_transport_disconnect() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.close().await.unwrap();
        assert!(!mock.is_connected());

        let result = mock.send(b"#\n").await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn mock_transport_remaining_expectations() {
        let mut mock = MockTransport::new();
        mock.expect(b"a\n", b"");
        mock.expect(b"b\n", b"");
        assert_eq!(mock.remaining_expectations(), 2);

        mock.send(b"a\n").await.unwrap();
        assert_eq!(mock.remaining_expectations(), 1);
    }
}
