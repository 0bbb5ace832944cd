//! Runs an expectation list against a live CLI session.

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use fcbridge_core::error::{Error, Result};
use fcbridge_core::session::CommandSession;

use crate::expectation::{Expectation, Expected};

/// Message recorded when a `get` response carries no `name = value` line.
pub const INVALID_RESPONSE: &str = "Invalid response format";

/// Outcome of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pass,
    Fail,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pass => write!(f, "pass"),
            Status::Fail => write!(f, "fail"),
            Status::Error => write!(f, "error"),
        }
    }
}

/// One verified entry, in the order the entries were given.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub name: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<Expected>,
    /// Why the entry could not be evaluated. Only set for [`Status::Error`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VerificationResult {
    fn error(name: &str, message: impl Into<String>) -> Self {
        VerificationResult {
            name: name.to_string(),
            status: Status::Error,
            actual_value: None,
            expected_value: None,
            message: Some(message.into()),
        }
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Setting: {}, Status: {}", self.name, self.status)?;
        if let Some(message) = &self.message {
            return write!(f, ", Message: {message}");
        }
        let actual = self.actual_value.as_deref().unwrap_or("");
        match &self.expected_value {
            Some(expected) => write!(f, ", Actual: {actual}, Expected: {expected}"),
            None => write!(f, ", Actual: {actual}, Expected: "),
        }
    }
}

/// Pull the value out of a `get` response.
///
/// Finds the first `=` that is followed, after optional whitespace, by
/// something on a line; the rest of that line is the value, trimmed. A
/// response with only blanks after the `=` yields an empty value. Returns
/// `None` when there is no usable `=` at all.
pub fn extract_value(response: &str) -> Option<String> {
    let is_line_break = |c: char| matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}');

    for (pos, _) in response.match_indices('=') {
        let rest = &response[pos + 1..];
        let skipped = rest.len() - rest.trim_start().len();

        let start = if skipped < rest.len() {
            Some(skipped)
        } else {
            // Nothing but whitespace to the end: settle for the last blank
            // that is not a line break.
            rest.char_indices()
                .filter(|&(_, c)| !is_line_break(c))
                .map(|(i, _)| i)
                .last()
        };

        if let Some(start) = start {
            let line = &rest[start..];
            let end = line.find(is_line_break).unwrap_or(line.len());
            return Some(line[..end].trim().to_string());
        }
    }
    None
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerificationReport {
    pub results: Vec<VerificationResult>,
}

impl VerificationReport {
    pub fn new(results: Vec<VerificationResult>) -> Self {
        VerificationReport { results }
    }

    fn count(&self, status: Status) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(Status::Pass)
    }

    pub fn failed(&self) -> usize {
        self.count(Status::Fail)
    }

    pub fn errors(&self) -> usize {
        self.count(Status::Error)
    }

    /// True when every entry passed (and there was at least one).
    pub fn all_passed(&self) -> bool {
        !self.results.is_empty() && self.passed() == self.results.len()
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} checked: {} passed, {} failed, {} errors",
            self.results.len(),
            self.passed(),
            self.failed(),
            self.errors()
        )
    }
}

/// Check every entry in order, one `get` at a time.
pub async fn verify(
    session: &dyn CommandSession,
    expectations: &[Expectation],
) -> Result<Vec<VerificationResult>> {
    verify_with(session, expectations, |_| {}).await
}

/// Like [`verify`], handing each result to `observer` as soon as it exists.
///
/// A timeout on one entry is recorded as an `error` result and the run goes
/// on. Losing the channel ends the run with that error.
pub async fn verify_with<F>(
    session: &dyn CommandSession,
    expectations: &[Expectation],
    mut observer: F,
) -> Result<Vec<VerificationResult>>
where
    F: FnMut(&VerificationResult) + Send,
{
    let mut results = Vec::with_capacity(expectations.len());

    for entry in expectations {
        let result = match session.exchange(&format!("get {}", entry.name)).await {
            Ok(response) => evaluate(entry, &response),
            Err(Error::Timeout) => {
                warn!(name = %entry.name, "no response to get");
                VerificationResult::error(&entry.name, Error::Timeout.to_string())
            }
            Err(e) => {
                warn!(name = %entry.name, error = %e, "verification aborted");
                return Err(e);
            }
        };

        info!(
            name = %result.name,
            status = %result.status,
            actual = result.actual_value.as_deref().unwrap_or(""),
            "setting checked"
        );
        observer(&result);
        results.push(result);
    }

    Ok(results)
}

/// Judge one response against its entry.
pub fn evaluate(entry: &Expectation, response: &str) -> VerificationResult {
    let Some(actual) = extract_value(response) else {
        return VerificationResult::error(&entry.name, INVALID_RESPONSE);
    };

    let status = if entry.accepts(&actual) {
        Status::Pass
    } else {
        Status::Fail
    };

    VerificationResult {
        name: entry.name.clone(),
        status,
        actual_value: Some(actual),
        expected_value: entry.expected(),
        message: None,
    }
}
