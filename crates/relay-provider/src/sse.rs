//! Server-Sent-Event framing.
//!
//! [`parse_framed_events`] is pure: it only decodes frames terminated by a
//! blank line. [`FrameBuffer`] holds the unterminated tail between reads.

/// One decoded SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if present.
    pub event: Option<String>,
    /// Value of the `id:` field, if present.
    pub id: Option<String>,
    /// All `data:` lines of the frame joined with `\n`.
    pub data: String,
}

/// Decode every complete frame in `text`.
///
/// Frames are separated by blank lines. Text after the last blank line is an
/// incomplete frame and is ignored; callers buffer it themselves. Frames
/// without any `data:` line are not emitted.
pub fn parse_framed_events(text: &str) -> Vec<SseEvent> {
    let normalized = normalize_newlines(text);
    let Some(end) = normalized.rfind("\n\n") else {
        return Vec::new();
    };

    normalized[..end]
        .split("\n\n")
        .filter_map(parse_frame)
        .collect()
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in frame.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event.event = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    event.data = data_lines.join("\n");
    Some(event)
}

fn normalize_newlines(text: &str) -> std::borrow::Cow<'_, str> {
    if text.contains('\r') {
        std::borrow::Cow::Owned(text.replace("\r\n", "\n"))
    } else {
        std::borrow::Cow::Borrowed(text)
    }
}

/// Accumulates SSE text across arbitrary read boundaries.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a read and return every frame it completed.
    pub fn push(&mut self, text: &str) -> Vec<SseEvent> {
        self.buffer.push_str(text);
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let Some(end) = self.buffer.rfind("\n\n") else {
            return Vec::new();
        };
        let remainder = self.buffer.split_off(end + 2);
        let complete = std::mem::replace(&mut self.buffer, remainder);
        parse_framed_events(&complete)
    }

    /// Flush the trailing frame at end of stream.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            return Vec::new();
        }
        parse_framed_events(&format!("{rest}\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_data_event_and_id() {
        let events = parse_framed_events("event: delta\nid: 7\ndata: {\"a\":1}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: Some("delta".to_string()),
                id: Some("7".to_string()),
                data: "{\"a\":1}".to_string(),
            }]
        );
    }

    #[test]
    fn test_joins_multiple_data_lines() {
        let events = parse_framed_events("data: one\ndata:two\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn test_unterminated_frame_is_not_returned() {
        let events = parse_framed_events("data: first\n\ndata: partial");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "first");
    }

    #[test]
    fn test_frames_without_data_are_skipped() {
        let events = parse_framed_events(": keep-alive\n\nevent: ping\n\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn test_crlf_frames() {
        let events = parse_framed_events("data: a\r\n\r\ndata: b\r\n\r\n");
        let data: Vec<_> = events.into_iter().map(|e| e.data).collect();
        assert_eq!(data, vec!["a", "b"]);
    }

    #[test]
    fn test_pure_and_idempotent() {
        let input = "data: a\n\ndata: b\n\n";
        assert_eq!(parse_framed_events(input), parse_framed_events(input));
    }

    #[test]
    fn test_frame_buffer_carries_partial_frame() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push("data: hel").is_empty());
        let events = buffer.push("lo\n\ndata: wor");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");

        let events = buffer.push("ld\n\n");
        assert_eq!(events[0].data, "world");
        assert!(buffer.finish().is_empty());
    }

    #[test]
    fn test_frame_buffer_crlf_split_across_reads() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push("data: a\r").is_empty());
        let events = buffer.push("\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a");
    }

    #[test]
    fn test_frame_buffer_finish_flushes_tail() {
        let mut buffer = FrameBuffer::new();
        buffer.push("data: [DONE]");
        let events = buffer.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "[DONE]");
    }
}
