//! fcbridge-core: core traits, events, and error definitions for fcbridge.
//!
//! This crate defines the transport-agnostic abstractions shared by the
//! command channel, the settings verifier, and the terminal front end.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level link to the flight controller
//! - [`CommandSession`] -- send one command, await its response
//! - [`BridgeEvent`] / [`ChannelState`] -- live output and lifecycle
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
pub use events::{BridgeEvent, ChannelState};
pub use session::CommandSession;
pub use transport::Transport;
