//! Outbound Server-Sent Events framing
//!
//! Everything the client receives goes through `OutboundFrame`, which
//! renders the exact SSE wire bytes. Content newlines are escaped to
//! literal `\n`/`\r` sequences so each logical chunk stays a single
//! `data:` line, and every stream is terminated by exactly one `[DONE]`
//! sentinel frame.

use std::time::Duration;

use serde_json::json;

use crate::event::UpstreamEvent;

/// Terminal sentinel payload ending every relay stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// One outbound SSE record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A content frame (`data: <payload>`), payload already escaped
    Data(String),

    /// Synthetic notification that a retry is about to happen
    Retry {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },

    /// Relay-level error payload; always followed by `Done`
    Error(String),

    /// Periodic keep-alive for quiet connections
    KeepAlive { timestamp: i64 },

    /// Terminal `[DONE]` sentinel, exactly once per relay
    Done,
}

impl OutboundFrame {
    /// Build a data frame from raw content, escaping control characters
    pub fn data(content: &str) -> Self {
        OutboundFrame::Data(escape_content(content))
    }

    /// Build an error frame with a JSON payload
    pub fn error(message: &str) -> Self {
        OutboundFrame::Error(json!({ "error": message }).to_string())
    }

    /// Build a keep-alive frame stamped with the current time
    pub fn keep_alive() -> Self {
        OutboundFrame::KeepAlive {
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Whether this frame represents real relay content
    ///
    /// Keep-alives and retry notices do not count as forwarded content for
    /// the retry-safety rule.
    pub fn is_content(&self) -> bool {
        matches!(self, OutboundFrame::Data(_))
    }

    /// Render this frame as SSE wire text
    pub fn to_wire(&self) -> String {
        match self {
            OutboundFrame::Data(payload) => format!("data: {}\n\n", payload),
            OutboundFrame::Retry {
                attempt,
                max_attempts,
                delay,
            } => {
                let payload = json!({
                    "attempt": attempt,
                    "max_attempts": max_attempts,
                    "delay_ms": delay.as_millis() as u64,
                });
                format!("event: retry\ndata: {}\n\n", payload)
            }
            OutboundFrame::Error(payload) => format!("data: {}\n\n", payload),
            OutboundFrame::KeepAlive { timestamp } => {
                format!("event: heartbeat\ndata: {{\"timestamp\":{}}}\n\n", timestamp)
            }
            OutboundFrame::Done => format!("data: {}\n\n", DONE_SENTINEL),
        }
    }
}

/// Escape content for embedding in a single `data:` line
///
/// SSE forbids raw newlines inside one field; the client expects one frame
/// per logical chunk and un-escapes on its side.
pub fn escape_content(content: &str) -> String {
    content.replace('\n', "\\n").replace('\r', "\\r")
}

/// Reverse of `escape_content`, used when collecting a stream into one
/// response body
pub fn unescape_content(content: &str) -> String {
    content.replace("\\n", "\n").replace("\\r", "\r")
}

/// Encoder configuration
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Forward begin/end lifecycle events to the client as JSON payloads.
    /// When off, lifecycle events are logged and suppressed, matching the
    /// older proxy behavior.
    pub forward_lifecycle: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            forward_lifecycle: true,
        }
    }
}

/// Serializes interpreted upstream events into outbound frames
#[derive(Debug, Clone, Default)]
pub struct SseEncoder {
    config: EncoderConfig,
}

impl SseEncoder {
    /// Create an encoder with the given configuration
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// Encode one upstream event into zero or more outbound frames
    pub fn encode(&self, event: &UpstreamEvent) -> Vec<OutboundFrame> {
        match event {
            UpstreamEvent::Begin { node_name } => self.lifecycle_frame("begin", node_name),
            UpstreamEvent::End { node_name } => self.lifecycle_frame("end", node_name),
            UpstreamEvent::Item { content } => vec![OutboundFrame::data(content)],
            UpstreamEvent::Error { message } => vec![OutboundFrame::error(message)],
            UpstreamEvent::PlainText { line } => vec![OutboundFrame::data(line)],
        }
    }

    fn lifecycle_frame(&self, kind: &str, node_name: &Option<String>) -> Vec<OutboundFrame> {
        if !self.config.forward_lifecycle {
            log::debug!("Suppressing {} event for node {:?}", kind, node_name);
            return Vec::new();
        }

        let payload = json!({ "type": kind, "nodeName": node_name }).to_string();
        vec![OutboundFrame::Data(payload)]
    }
}
