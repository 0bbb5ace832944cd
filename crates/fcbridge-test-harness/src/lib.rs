//! fcbridge-test-harness: scripted mock transport for fcbridge.
//!
//! This crate provides [`MockTransport`], a fake flight controller for
//! deterministic tests of the line framer, the command channel and the
//! settings verifier without real hardware.

pub mod mock_serial;

pub use mock_serial::{MockTransport, SentLog};
