//! Line framing and the single-IO-task command channel for the
//! flight-controller CLI.
//!
//! One tokio task owns the transport exclusively. It splits device output
//! into lines, correlates each awaited command with the response block that
//! ends at the next `#` prompt, and routes everything else to a session log.
//!
//! # Architecture
//!
//! - [`framer`] : bytes to lines, partial tail retained
//! - [`io`] : IO task types, spawn, and the select loop
//! - [`log`] : the session log sink and its plain-text export

pub mod framer;
pub mod io;
pub mod log;

pub use framer::LineFramer;
pub use io::{CliChannel, IoConfig, PromptMatch, spawn_channel};
pub use log::{LogSink, SessionLog};
