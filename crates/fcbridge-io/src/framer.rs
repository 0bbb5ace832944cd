//! Line framing for the flight-controller CLI byte stream.
//!
//! The serial port hands over bytes in whatever pieces the USB stack felt
//! like delivering. [`LineFramer`] turns those pieces into complete lines:
//! `\n` and `\r\n` both terminate a line, the terminator is stripped, and an
//! unterminated tail is held back until the rest of it arrives.
//!
//! Framing is done on bytes and each line decoded on its own, so a UTF-8
//! sequence split across two reads still decodes correctly.

/// The line feed byte that terminates every CLI line.
pub const LINE_FEED: u8 = b'\n';

/// Default bound on an unterminated line. CLI output lines are short (a
/// `diff all` line is well under 200 bytes); 8192 is generous headroom.
pub const DEFAULT_MAX_LINE: usize = 8192;

/// Splits a chunked byte stream into logical lines.
#[derive(Debug, Clone)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_line: usize,
}

impl LineFramer {
    /// Create a framer with the default line bound.
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    /// Create a framer that discards an unterminated line once it grows past
    /// `max_line` bytes.
    pub fn with_max_line(max_line: usize) -> Self {
        LineFramer {
            buf: Vec::new(),
            max_line,
        }
    }

    /// Append `chunk` and return every line it completed, in arrival order.
    ///
    /// A chunk without a terminator only extends the retained tail.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|&b| b == LINE_FEED) {
            let end = start + pos;
            let mut line = &self.buf[start..end];
            if let [rest @ .., b'\r'] = line {
                line = rest;
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
        }
        self.buf.drain(..start);

        if self.buf.len() > self.max_line {
            tracing::warn!(
                len = self.buf.len(),
                max = self.max_line,
                "unterminated line overflow, resetting"
            );
            self.buf.clear();
        }

        lines
    }

    /// The unterminated tail, e.g. a `# ` prompt waiting for input.
    pub fn remainder(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the unterminated tail as text. A trailing `\r` is dropped.
    pub fn take_remainder(&mut self) -> String {
        let mut tail = std::mem::take(&mut self.buf);
        if tail.last() == Some(&b'\r') {
            tail.pop();
        }
        String::from_utf8_lossy(&tail).into_owned()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}
