//! Server-sent event framing
//!
//! Wire contract: every frame is `data: <payload>\n\n`, the stream ends
//! with `data: [DONE]\n\n`. Payloads spanning several lines are split
//! into one `data:` field per line so `EventSource` clients rejoin them
//! with `\n` unchanged.

use axum::body::Bytes;

pub const DONE_MARKER: &str = "[DONE]";
const ERROR_PREFIX: &str = "Error: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One flush unit of the reply.
    Chunk(String),
    /// A failure reported in-band after part of the reply was delivered.
    Error(String),
    /// Stream complete.
    Done,
}

impl Frame {
    pub fn payload(&self) -> String {
        match self {
            Frame::Chunk(text) => text.clone(),
            Frame::Error(message) => format!("{}{}", ERROR_PREFIX, message),
            Frame::Done => DONE_MARKER.to_string(),
        }
    }

    pub fn encode(&self) -> String {
        let payload = self.payload();
        let mut out = String::with_capacity(payload.len() + 8);
        for line in payload.split('\n') {
            out.push_str("data: ");
            out.push_str(line.strip_suffix('\r').unwrap_or(line));
            out.push('\n');
        }
        out.push('\n');
        out
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.encode())
    }
}

/// Split an event-stream body back into event payloads, in order.
pub fn parse_events(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter(|event| !event.is_empty())
        .map(|event| {
            event
                .lines()
                .filter_map(|line| line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect()
}
