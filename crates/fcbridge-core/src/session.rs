//! Request/response seam between the command channel and its consumers.

use async_trait::async_trait;

use crate::error::Result;

/// Anything that can issue one CLI command and hand back its response.
///
/// Implemented by the command channel in `fcbridge-io`. The settings
/// verifier depends only on this trait, so it can run against an in-memory
/// fake as easily as against a live controller.
#[async_trait]
pub trait CommandSession: Send + Sync {
    /// Send `line` and wait for the response block terminated by the device
    /// prompt. The returned text is trimmed and keeps its inner line breaks.
    async fn exchange(&self, line: &str) -> Result<String>;
}
