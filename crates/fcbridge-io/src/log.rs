//! Session log: the free-running sink for device output.
//!
//! Every line the command channel does not hand to a pending request ends up
//! here, together with a `Sent: ...` record for each line written and the
//! occasional status notice from the front end. The log can be cleared and
//! exported as plain text.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use fcbridge_core::error::Result;

/// File name used when exporting the log without an explicit path.
pub const DEFAULT_EXPORT_FILE: &str = "betaflight-cli-output.txt";

/// Receives everything the IO task logs.
///
/// The IO task calls [`LogSink::line`] for unsolicited device output and
/// [`LogSink::sent`] for every line it writes.
pub trait LogSink: Send + Sync + 'static {
    fn line(&self, line: &str);

    fn sent(&self, line: &str) {
        self.line(&format!("Sent: {line}"));
    }
}

/// In-memory, exportable record of a session.
#[derive(Debug, Default)]
pub struct SessionLog {
    lines: Mutex<Vec<String>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a line (status notices from the front end use this too).
    pub fn push(&self, line: impl Into<String>) {
        self.guard().push(line.into());
    }

    /// Snapshot of every logged line, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.guard().clone()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Forget everything logged so far.
    pub fn clear(&self) {
        self.guard().clear();
    }

    /// The log as plain text: every line followed by `\n`.
    pub fn export_text(&self) -> String {
        let lines = self.guard();
        let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines.iter() {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Write [`export_text`](Self::export_text) to `path`, replacing any
    /// existing file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.export_text())?;
        tracing::info!(path = %path.display(), lines = self.len(), "session log saved");
        Ok(())
    }
}

impl LogSink for SessionLog {
    fn line(&self, line: &str) {
        self.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sent_lines_are_prefixed() {
        let log = SessionLog::new();
        log.sent("get min_throttle");
        assert_eq!(log.lines(), vec!["Sent: get min_throttle"]);
    }

    #[test]
    fn export_is_exact_concatenation() {
        let log = SessionLog::new();
        for line in ["Connected to controller.", "", "# status", "CPU:12% cycle=125"] {
            log.push(line);
        }
        assert_eq!(
            log.export_text(),
            "Connected to controller.\n\n# status\nCPU:12% cycle=125\n"
        );
    }

    #[test]
    fn empty_log_exports_empty_text() {
        assert_eq!(SessionLog::new().export_text(), "");
    }

    #[test]
    fn clear_resets_log() {
        let log = SessionLog::new();
        log.push("a");
        log.push("b");
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.export_text(), "");
    }

    #[test]
    fn save_round_trips_bytes() {
        let log = SessionLog::new();
        log.push("name = Böse Quad");
        log.push("# ");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_EXPORT_FILE);

        log.save_to(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), log.export_text());
    }
}
