//! Transport trait for the device link.
//!
//! The [`Transport`] trait abstracts over the byte stream to the flight
//! controller. `SerialTransport` in `fcbridge-transport` covers
//! USB virtual COM ports; `MockTransport` from `fcbridge-test-harness`
//! scripts a fake controller for deterministic tests.
//!
//! The command channel operates on a `Transport` rather than a serial port
//! directly, so the framer, the channel and the verifier can all be tested
//! without hardware.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to the device.
///
/// Implementations only move bytes. Line framing, prompt detection and
/// request correlation live in `fcbridge-io`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write raw bytes to the device.
    ///
    /// Implementations should not return until all bytes have been handed
    /// to the underlying port and flushed.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the device into the provided buffer.
    ///
    /// Returns the number of bytes read, always greater than zero. Waits up
    /// to `timeout` for data; returns
    /// [`Error::Timeout`](crate::error::Error::Timeout) when nothing arrived
    /// and [`Error::ConnectionLost`](crate::error::Error::ConnectionLost) when
    /// the stream has ended. The two are never conflated.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport.
    ///
    /// After `close()`, subsequent `send()` and `receive()` calls should
    /// return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently open.
    fn is_connected(&self) -> bool;
}
