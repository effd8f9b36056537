// ABOUTME: Pure Server-Sent Events parser over byte spans
// ABOUTME: Implements the SSE field rules used for end-of-stream usage metering
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! Pure SSE parsing. Input is a byte span, output is the ordered event
//! sequence; no state survives between calls.

use serde::{Deserialize, Serialize};

/// One committed SSE event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseEvent {
    /// `event` field, when present
    pub event: Option<String>,
    /// Concatenated `data` lines, joined with `\n`
    pub data: Option<String>,
    /// `id` field, when present
    pub id: Option<String>,
    /// `retry` field in milliseconds, when present and numeric
    pub retry: Option<u64>,
}

struct PendingEvent {
    event: Option<String>,
    data_lines: Vec<String>,
    has_data: bool,
    id: Option<String>,
    retry: Option<u64>,
}

impl PendingEvent {
    const fn new() -> Self {
        Self {
            event: None,
            data_lines: Vec::new(),
            has_data: false,
            id: None,
            retry: None,
        }
    }

    /// An event commits once any data, event, or id has been seen
    const fn is_dirty(&self) -> bool {
        self.has_data || self.event.is_some() || self.id.is_some()
    }

    fn commit(self) -> SseEvent {
        SseEvent {
            event: self.event,
            data: if self.has_data {
                Some(self.data_lines.join("\n"))
            } else {
                None
            },
            id: self.id,
            retry: self.retry,
        }
    }
}

/// Parse a byte span into its ordered sequence of SSE events
///
/// Lines are delimited by `\n` with `\r\n` and bare `\r` normalized.
/// Comment lines (leading `:`) are ignored. A single leading space in a
/// field value is stripped. Multiple `data` lines concatenate with `\n`.
/// An empty line commits the pending event; a trailing event with no
/// terminating blank line is committed at end of input.
#[must_use]
pub fn parse_events(input: &[u8]) -> Vec<SseEvent> {
    let text = String::from_utf8_lossy(input);
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut events = Vec::new();
    let mut pending = PendingEvent::new();

    for line in normalized.split('\n') {
        if line.is_empty() {
            if pending.is_dirty() {
                events.push(std::mem::replace(&mut pending, PendingEvent::new()).commit());
            } else {
                pending = PendingEvent::new();
            }
            continue;
        }

        if line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => pending.event = Some(value.to_owned()),
            "data" => {
                pending.data_lines.push(value.to_owned());
                pending.has_data = true;
            }
            "id" => pending.id = Some(value.to_owned()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    pending.retry = Some(ms);
                }
            }
            _ => {}
        }
    }

    if pending.is_dirty() {
        events.push(pending.commit());
    }

    events
}

/// The final committed event, if the span contains one
#[must_use]
pub fn last_event(input: &[u8]) -> Option<SseEvent> {
    parse_events(input).pop()
}

/// The `data` field of the final committed event
///
/// This is the common case for end-of-stream usage metering, where the
/// final event carries the billing summary.
#[must_use]
pub fn last_data(input: &[u8]) -> Option<String> {
    last_event(input).and_then(|event| event.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_data_lines_concatenate() {
        let events = parse_events(b"data: one\ndata: two\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.as_deref(), Some("one\ntwo"));
    }

    #[test]
    fn comments_are_ignored() {
        let events = parse_events(b": keepalive\n\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.as_deref(), Some("x"));
    }

    #[test]
    fn trailing_event_commits_at_end_of_input() {
        let events = parse_events(b"data: unterminated");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.as_deref(), Some("unterminated"));
    }

    #[test]
    fn carriage_returns_normalize() {
        let events = parse_events(b"data: a\r\n\r\ndata: b\r\r");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data.as_deref(), Some("a"));
        assert_eq!(events[1].data.as_deref(), Some("b"));
    }

    #[test]
    fn only_one_leading_space_is_stripped() {
        let events = parse_events(b"data:  padded\n\n");
        assert_eq!(events[0].data.as_deref(), Some(" padded"));
    }
}
