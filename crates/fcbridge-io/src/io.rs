//! Command channel: the IO task between the serial port and its callers.
//!
//! One tokio task owns the transport exclusively. It enters CLI mode after a
//! settle delay, then loops: reading device output through a
//! [`LineFramer`], writing queued command lines, and correlating each
//! [`CliChannel::send_and_await`] with the response block that ends at the
//! next device prompt.
//!
//! Routing is an owned field of the loop, not a swapped callback: while a
//! [`PendingRequest`] is live every complete line goes into its accumulator,
//! otherwise lines go to the [`LogSink`] and out as [`BridgeEvent::Line`].
//! The loop stops taking requests while one is pending, so callers that race
//! each other are served strictly in queue order and never see each other's
//! output.
//!
//! It also holds requests back while the device may still be printing a
//! prompt nobody asked for: after mode entry until the CLI banner's prompt
//! arrives, and after a timeout until the late reply's prompt arrives or the
//! line goes quiet. That output goes to the log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fcbridge_core::error::{Error, Result};
use fcbridge_core::events::{BridgeEvent, ChannelState};
use fcbridge_core::session::CommandSession;
use fcbridge_core::transport::Transport;

use crate::framer::{DEFAULT_MAX_LINE, LineFramer};
use crate::log::LogSink;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The character the CLI prints when it is ready for the next command.
pub const PROMPT_MARKER: char = '#';

/// Line written after the settle delay to switch the controller into CLI mode.
pub const MODE_ENTRY: &str = "#";

/// Pause between idle polls when the transport reports no data.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Where the prompt marker has to appear to end a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptMatch {
    /// A line (or the unterminated tail) that starts with the marker. A `#`
    /// inside a value such as `name = Quad#1` does not end the response.
    #[default]
    LineStart,
    /// Any occurrence of the marker, anywhere in the response.
    Anywhere,
}

impl PromptMatch {
    /// Whether `text` ends a response under this policy.
    pub fn matches(self, marker: char, text: &str) -> bool {
        match self {
            PromptMatch::LineStart => text.starts_with(marker),
            PromptMatch::Anywhere => text.contains(marker),
        }
    }
}

/// Configuration for the CLI IO task.
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Pause after the port opens before anything is written (default 300ms).
    pub settle_delay: Duration,
    /// Line written after the settle delay; `None` skips mode entry.
    pub mode_entry: Option<String>,
    /// Default deadline for [`CliChannel::send_and_await`] (default 5s).
    pub command_timeout: Duration,
    /// Prompt character (default `#`).
    pub prompt_marker: char,
    /// How the prompt is recognised.
    pub prompt_match: PromptMatch,
    /// Longest unterminated line the framer will hold.
    pub max_line: usize,
    /// How long a single transport read waits before the loop re-checks
    /// requests and deadlines.
    pub poll_interval: Duration,
    /// After a timeout, how long the line has to stay silent before the next
    /// request is written, when no prompt shows up first (default 1s).
    pub resync_quiet: Duration,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            settle_delay: Duration::from_millis(300),
            mode_entry: Some(MODE_ENTRY.to_string()),
            command_timeout: Duration::from_secs(5),
            prompt_marker: PROMPT_MARKER,
            prompt_match: PromptMatch::default(),
            max_line: DEFAULT_MAX_LINE,
            poll_interval: Duration::from_millis(100),
            resync_quiet: Duration::from_secs(1),
        }
    }
}

/// A request sent from [`CliChannel`] to the IO task.
pub enum Request {
    /// Write a line, no response expected.
    Send { line: String },
    /// Write a line and collect everything up to the next prompt.
    SendAndAwait {
        line: String,
        timeout: Duration,
        reply: oneshot::Sender<Result<String>>,
    },
    /// Graceful shutdown; returns the transport for reuse.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// The in-flight `send_and_await`. At most one exists per channel.
struct PendingRequest {
    command: String,
    lines: Vec<String>,
    deadline: Instant,
    reply: oneshot::Sender<Result<String>>,
}

impl PendingRequest {
    fn new(command: String, timeout: Duration, reply: oneshot::Sender<Result<String>>) -> Self {
        PendingRequest {
            command,
            lines: Vec::new(),
            deadline: Instant::now() + timeout,
            reply,
        }
    }

    /// The accumulated response, line breaks kept, outer whitespace trimmed.
    fn text(&self) -> String {
        self.lines.join("\n").trim().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldKind {
    /// Waiting for the prompt that follows mode entry.
    ModeEntry,
    /// Draining what is left of a reply nobody is waiting for.
    Resync,
}

/// A stretch during which no request is taken and device output goes to the
/// log. It ends at the next prompt or at `deadline`.
struct Hold {
    kind: HoldKind,
    deadline: Instant,
    /// `Resync` only: output pushes the deadline out by this much.
    quiet: Option<Duration>,
    /// Latest the deadline can be pushed to.
    limit: Instant,
}

impl Hold {
    fn mode_entry(config: &IoConfig) -> Self {
        let deadline = Instant::now() + config.command_timeout;
        Hold {
            kind: HoldKind::ModeEntry,
            deadline,
            quiet: None,
            limit: deadline,
        }
    }

    fn resync(config: &IoConfig) -> Self {
        let now = Instant::now();
        let limit = now + config.command_timeout;
        Hold {
            kind: HoldKind::Resync,
            deadline: (now + config.resync_quiet).min(limit),
            quiet: Some(config.resync_quiet),
            limit,
        }
    }

    fn output_seen(&mut self) {
        if let Some(quiet) = self.quiet {
            self.deadline = (Instant::now() + quiet).min(self.limit);
        }
    }

    fn lapse(self) {
        match self.kind {
            HoldKind::ModeEntry => warn!("no prompt after mode entry, continuing anyway"),
            HoldKind::Resync => debug!("line quiet after timeout, taking requests again"),
        }
    }

    fn prompt_seen(self) {
        debug!(kind = ?self.kind, "prompt seen, taking requests");
    }
}

/// Handle to the IO task.
pub struct CliChannel {
    tx: mpsc::Sender<Request>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    state: watch::Receiver<ChannelState>,
    command_timeout: Duration,
}

impl CliChannel {
    /// Write `line` followed by `\n`. Fire-and-forget.
    ///
    /// Blank lines are ignored, and so is everything once the channel has
    /// stopped; neither is reported to the caller.
    pub async fn send(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let req = Request::Send {
            line: line.to_string(),
        };
        if self.tx.send(req).await.is_err() {
            debug!(line, "channel not running, dropping line");
        }
    }

    /// Write `line` and wait for the response block, using the configured
    /// command timeout.
    pub async fn send_and_await(&self, line: &str) -> Result<String> {
        self.send_and_await_with_timeout(line, self.command_timeout)
            .await
    }

    /// Write `line` and wait for the response block.
    ///
    /// The deadline starts when the line is written, not while the request
    /// waits behind earlier ones. On timeout the partial response is moved to
    /// the log and [`Error::Timeout`] is returned.
    pub async fn send_and_await_with_timeout(
        &self,
        line: &str,
        timeout: Duration,
    ) -> Result<String> {
        if line.trim().is_empty() {
            return Err(Error::InvalidParameter("command is blank".into()));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::SendAndAwait {
                line: line.to_string(),
                timeout,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::NotConnected),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Default deadline applied by [`send_and_await`](Self::send_and_await).
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Stop the IO task and close the transport.
    ///
    /// A request still waiting for its prompt fails with
    /// [`Error::NotConnected`]; queued requests are dropped the same way.
    pub async fn close(&self) {
        self.cancel.cancel();
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == ChannelState::Closed).await;
    }

    /// Shut down the IO task once queued requests are done and recover the
    /// transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Request::Shutdown { reply: reply_tx }).await;
        let transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        let _ = self.task.await;
        Ok(transport)
    }
}

#[async_trait]
impl CommandSession for CliChannel {
    async fn exchange(&self, line: &str) -> Result<String> {
        self.send_and_await(line).await
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the IO task for an already-open transport.
///
/// The task waits `settle_delay`, writes the mode-entry line and starts
/// reading. [`BridgeEvent::Connected`] follows the first prompt.
pub fn spawn_channel(
    transport: Box<dyn Transport>,
    config: IoConfig,
    sink: Arc<dyn LogSink>,
    event_tx: broadcast::Sender<BridgeEvent>,
) -> CliChannel {
    let (tx, rx) = mpsc::channel::<Request>(32);
    let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
    let cancel = CancellationToken::new();
    let command_timeout = config.command_timeout;

    let task = tokio::spawn(io_loop(
        transport,
        config,
        sink,
        event_tx,
        rx,
        state_tx,
        cancel.clone(),
    ));

    CliChannel {
        tx,
        cancel,
        task,
        state: state_rx,
        command_timeout,
    }
}

// ---------------------------------------------------------------------------
// IO Loop
// ---------------------------------------------------------------------------

/// Why the read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Cancelled,
    RequestsClosed,
    StreamEnded,
}

/// Everything the loop routes output to.
struct Outputs<'a> {
    sink: &'a dyn LogSink,
    event_tx: &'a broadcast::Sender<BridgeEvent>,
}

impl Outputs<'_> {
    fn log_line(&self, line: String) {
        self.sink.line(&line);
        let _ = self.event_tx.send(BridgeEvent::Line(line));
    }

    fn sent(&self, line: &str) {
        self.sink.sent(line);
        let _ = self.event_tx.send(BridgeEvent::Sent(line.to_string()));
    }
}

/// The main IO loop. Runs as a spawned Tokio task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. The pending request's deadline, or the end of a hold
/// 3. Queued requests (only while nothing is pending or held)
/// 4. Reading device output
async fn io_loop(
    mut transport: Box<dyn Transport>,
    config: IoConfig,
    sink: Arc<dyn LogSink>,
    event_tx: broadcast::Sender<BridgeEvent>,
    mut rx: mpsc::Receiver<Request>,
    state_tx: watch::Sender<ChannelState>,
    cancel: CancellationToken,
) {
    let out = Outputs {
        sink: &*sink,
        event_tx: &event_tx,
    };

    tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            debug!("CLI IO task cancelled during settle delay");
            finish(&mut *transport, None, LoopExit::Cancelled, &out, &state_tx).await;
            return;
        }

        _ = tokio::time::sleep(config.settle_delay) => {}
    }

    let mut hold: Option<Hold> = None;
    if let Some(entry) = &config.mode_entry {
        if let Err(e) = write_line(&mut *transport, entry, &out).await {
            warn!(error = %e, "failed to enter CLI mode");
            finish(&mut *transport, None, LoopExit::StreamEnded, &out, &state_tx).await;
            return;
        }
        hold = Some(Hold::mode_entry(&config));
    }

    let mut framer = LineFramer::with_max_line(config.max_line);
    let mut pending: Option<PendingRequest> = None;
    let mut connected = false;
    let mut buf = [0u8; 256];

    let exit = loop {
        publish_state(&state_tx, channel_state(&pending, &hold));
        if !connected && !matches!(&hold, Some(h) if h.kind == HoldKind::ModeEntry) {
            connected = true;
            let _ = event_tx.send(BridgeEvent::Connected);
            info!("CLI channel ready");
        }

        let deadline = match (&pending, &hold) {
            (Some(p), _) => Some(p.deadline),
            (None, Some(h)) => Some(h.deadline),
            (None, None) => None,
        };

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("CLI IO task cancelled");
                break LoopExit::Cancelled;
            }

            _ = sleep_until(deadline), if deadline.is_some() => {
                if let Some(p) = pending.take() {
                    expire(p, &out);
                    hold = Some(Hold::resync(&config));
                } else if let Some(h) = hold.take() {
                    h.lapse();
                }
            }

            req = rx.recv(), if pending.is_none() && hold.is_none() => {
                match req {
                    Some(Request::Shutdown { reply }) => {
                        debug!("CLI IO task shutdown requested");
                        let _ = state_tx.send(ChannelState::Closed);
                        let _ = event_tx.send(BridgeEvent::Disconnected);
                        let _ = reply.send(transport);
                        return;
                    }
                    Some(Request::Send { line }) => {
                        flush_tail(&mut framer, &out);
                        if let Err(e) = write_line(&mut *transport, &line, &out).await {
                            warn!(line = %line, error = %e, "failed to send line");
                            if matches!(e, Error::ConnectionLost) {
                                break LoopExit::StreamEnded;
                            }
                        }
                    }
                    Some(Request::SendAndAwait { line, timeout, reply }) => {
                        flush_tail(&mut framer, &out);
                        match write_line(&mut *transport, &line, &out).await {
                            Ok(()) => {
                                pending = Some(PendingRequest::new(line, timeout, reply));
                            }
                            Err(e) => {
                                warn!(line = %line, error = %e, "failed to send command");
                                let lost = matches!(e, Error::ConnectionLost);
                                let _ = reply.send(Err(e));
                                if lost {
                                    break LoopExit::StreamEnded;
                                }
                            }
                        }
                    }
                    None => {
                        debug!("request channel closed, exiting CLI IO task");
                        break LoopExit::RequestsClosed;
                    }
                }
            }

            read = read_chunk(&mut *transport, &mut buf, config.poll_interval) => {
                match read {
                    Ok(n) => {
                        route_chunk(&buf[..n], &mut framer, &mut pending, &mut hold, &config, &out);
                    }
                    Err(Error::Timeout) => {}
                    Err(e) => {
                        info!(error = %e, "device stream ended");
                        break LoopExit::StreamEnded;
                    }
                }
            }
        }
    };

    finish(&mut *transport, pending, exit, &out, &state_tx).await;
}

/// Fail any pending request, close the transport and publish `Closed`.
async fn finish(
    transport: &mut dyn Transport,
    pending: Option<PendingRequest>,
    exit: LoopExit,
    out: &Outputs<'_>,
    state_tx: &watch::Sender<ChannelState>,
) {
    if let Some(p) = pending {
        let err = match exit {
            LoopExit::StreamEnded => Error::ConnectionLost,
            LoopExit::Cancelled | LoopExit::RequestsClosed => Error::NotConnected,
        };
        debug!(command = %p.command, error = %err, "abandoning pending request");
        for line in p.lines {
            out.log_line(line);
        }
        let _ = p.reply.send(Err(err));
    }

    if let Err(e) = transport.close().await {
        warn!(error = %e, "failed to close transport");
    }

    let _ = state_tx.send(ChannelState::Closed);
    let _ = out.event_tx.send(BridgeEvent::Disconnected);
    debug!(?exit, "CLI IO task finished");
}

fn channel_state(pending: &Option<PendingRequest>, hold: &Option<Hold>) -> ChannelState {
    match (pending, hold) {
        (Some(_), _) => ChannelState::AwaitingResponse,
        (None, Some(h)) if h.kind == HoldKind::ModeEntry => ChannelState::Connecting,
        (None, Some(_)) => ChannelState::AwaitingResponse,
        (None, None) => ChannelState::Ready,
    }
}

/// Publish `state` unless it is already current.
fn publish_state(state_tx: &watch::Sender<ChannelState>, state: ChannelState) {
    state_tx.send_if_modified(|current| {
        if *current == state {
            return false;
        }
        *current = state;
        true
    });
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Read one chunk. A timeout is passed through after a short backoff so the
/// loop can check for requests, deadlines or cancellation.
async fn read_chunk(
    transport: &mut dyn Transport,
    buf: &mut [u8],
    poll_interval: Duration,
) -> Result<usize> {
    match transport.receive(buf, poll_interval).await {
        Err(Error::Timeout) => {
            tokio::time::sleep(IDLE_BACKOFF).await;
            Err(Error::Timeout)
        }
        other => other,
    }
}

/// Write `line` plus the line feed and record it as sent.
async fn write_line(transport: &mut dyn Transport, line: &str, out: &Outputs<'_>) -> Result<()> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');
    transport.send(&bytes).await?;
    debug!(line, "sent");
    out.sent(line);
    Ok(())
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Move an unterminated tail (usually the `# ` prompt) to the log before a
/// write, so every command starts on a fresh line and a stale prompt cannot
/// complete the next request.
fn flush_tail(framer: &mut LineFramer, out: &Outputs<'_>) {
    if !framer.remainder().is_empty() {
        out.log_line(framer.take_remainder());
    }
}

/// Feed a chunk to the framer and route every resulting line.
///
/// A prompt completes the pending request, or ends the hold when nothing is
/// pending. Output during a hold goes to the log.
fn route_chunk(
    chunk: &[u8],
    framer: &mut LineFramer,
    pending: &mut Option<PendingRequest>,
    hold: &mut Option<Hold>,
    config: &IoConfig,
    out: &Outputs<'_>,
) {
    let is_prompt = |text: &str| config.prompt_match.matches(config.prompt_marker, text);

    for line in framer.feed(chunk) {
        if let Some(p) = pending.as_mut() {
            if !p.reply.is_closed() {
                let done = is_prompt(&line);
                p.lines.push(line);
                if done {
                    if let Some(p) = pending.take() {
                        complete(p, out);
                    }
                }
                continue;
            }
            // The rest of this reply is still on its way.
            if let Some(p) = pending.take() {
                abandon(p, out);
            }
            *hold = Some(Hold::resync(config));
        }

        let prompt = is_prompt(&line);
        out.log_line(line);
        if prompt {
            if let Some(h) = hold.take() {
                h.prompt_seen();
            }
        }
    }

    // The CLI prompt is never newline-terminated, so check the tail too.
    if is_prompt(&String::from_utf8_lossy(framer.remainder())) {
        if let Some(mut p) = pending.take() {
            p.lines.push(framer.take_remainder());
            complete(p, out);
        } else if let Some(h) = hold.take() {
            out.log_line(framer.take_remainder());
            h.prompt_seen();
        }
    }

    if let Some(h) = hold.as_mut() {
        h.output_seen();
    }
}

fn complete(p: PendingRequest, out: &Outputs<'_>) {
    let text = p.text();
    debug!(command = %p.command, lines = p.lines.len(), "response complete");
    let _ = out.event_tx.send(BridgeEvent::Response {
        command: p.command,
        text: text.clone(),
    });
    if p.reply.send(Ok(text)).is_err() {
        debug!("response arrived after the caller went away");
    }
}

fn expire(p: PendingRequest, out: &Outputs<'_>) {
    warn!(command = %p.command, lines = p.lines.len(), "timed out waiting for prompt");
    for line in p.lines {
        out.log_line(line);
    }
    let _ = out.event_tx.send(BridgeEvent::Timeout { command: p.command });
    let _ = p.reply.send(Err(Error::Timeout));
}

fn abandon(p: PendingRequest, out: &Outputs<'_>) {
    debug!(command = %p.command, "caller went away, routing back to log");
    for line in p.lines {
        out.log_line(line);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
