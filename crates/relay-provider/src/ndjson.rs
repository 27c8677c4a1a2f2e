//! Newline-delimited JSON records.

use serde_json::Value;

/// Decode every non-blank line of `text` as a JSON value.
///
/// A malformed line is logged and dropped; it never aborts the batch.
pub fn parse_line_records(text: &str) -> Vec<Value> {
    text.split('\n').filter_map(parse_record).collect()
}

fn parse_record(line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, line, "dropping malformed record");
            None
        }
    }
}

/// Line accumulator bridging arbitrary read boundaries.
///
/// Each push processes every complete line and keeps the trailing,
/// possibly incomplete segment for the next read.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a read and return the records it completed.
    pub fn push(&mut self, text: &str) -> Vec<Value> {
        self.pending.push_str(text);
        let Some(last_newline) = self.pending.rfind('\n') else {
            return Vec::new();
        };
        let tail = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, tail);
        parse_line_records(&complete)
    }

    /// Parse whatever remains once the stream has ended.
    pub fn finish(&mut self) -> Vec<Value> {
        let rest = std::mem::take(&mut self.pending);
        parse_line_records(&rest)
    }

    /// Whether an unterminated fragment is held.
    pub fn has_pending(&self) -> bool {
        !self.pending.trim().is_empty()
    }
}
