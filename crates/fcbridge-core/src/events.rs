//! Session events and channel lifecycle.
//!
//! Events are emitted by the command channel through a
//! [`tokio::sync::broadcast`]-style channel so a terminal front end can show
//! device output live. Delivery is best effort: a slow subscriber may miss
//! events, which is why the authoritative record is the session log sink,
//! not this stream.

use std::fmt;

/// An event emitted by the command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// The controller answered mode entry with its prompt (or stayed quiet
    /// for a whole command timeout) and requests are now taken.
    Connected,

    /// A line of unsolicited device output (routed to the log).
    Line(String),

    /// A line was written to the device.
    Sent(String),

    /// A correlated response completed.
    Response {
        /// The command that was sent.
        command: String,
        /// The trimmed response text.
        text: String,
    },

    /// A correlated request hit its deadline before the prompt appeared.
    Timeout {
        /// The command that was sent.
        command: String,
    },

    /// The read loop ended (end-of-stream, close, or shutdown).
    Disconnected,
}

/// Lifecycle of a command channel.
///
/// `Disconnected → Connecting → Ready ⇄ AwaitingResponse`, with `Closed`
/// reachable from any state and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Disconnected,
    /// Transport open; settle delay and mode entry in progress, until the
    /// first prompt.
    Connecting,
    /// Read loop running, no request in flight.
    Ready,
    /// A `send_and_await` is waiting for the prompt, or a timed-out reply is
    /// being drained.
    AwaitingResponse,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connecting => "connecting",
            ChannelState::Ready => "ready",
            ChannelState::AwaitingResponse => "awaiting response",
            ChannelState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(ChannelState::default(), ChannelState::Disconnected);
    }

    #[test]
    fn state_display() {
        assert_eq!(ChannelState::AwaitingResponse.to_string(), "awaiting response");
        assert_eq!(ChannelState::Closed.to_string(), "closed");
    }
}
