//! Typed interpretation of upstream NDJSON lines
//!
//! The upstream emits newline-delimited JSON chunks with a `type` field
//! (`begin`, `item`, `end`, `error`), optionally interleaved with plain
//! non-JSON lines. Each line is decoded once, at this boundary, into the
//! closed `UpstreamEvent` variant so downstream code is exhaustively
//! checked instead of poking at loose JSON.

use log::debug;
use serde::Deserialize;

/// One interpreted upstream line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// A node started streaming
    Begin { node_name: Option<String> },

    /// One content chunk
    Item { content: String },

    /// A node finished streaming
    End { node_name: Option<String> },

    /// The upstream reported an error; the relay terminates after this
    Error { message: String },

    /// A non-JSON line forwarded verbatim
    PlainText { line: String },
}

/// Metadata block attached to lifecycle chunks
#[derive(Debug, Default, Deserialize)]
struct ChunkMetadata {
    #[serde(rename = "nodeName")]
    node_name: Option<String>,
}

/// Wire shape of one upstream JSON chunk
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawChunk {
    Begin {
        #[serde(default)]
        metadata: ChunkMetadata,
    },
    Item {
        #[serde(default)]
        content: Option<String>,
    },
    End {
        #[serde(default)]
        metadata: ChunkMetadata,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
        // Older upstream versions put the error text in `content`
        #[serde(default)]
        content: Option<String>,
    },
}

/// Interpret one logical line as an upstream event
///
/// Returns `None` for lines that produce nothing: empty lines, malformed
/// JSON that looks like JSON (dropped and logged rather than corrupting
/// the client stream), and `item` chunks with a null content. Never
/// panics on malformed input.
pub fn interpret(line: &str) -> Option<UpstreamEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<RawChunk>(trimmed) {
        Ok(RawChunk::Begin { metadata }) => Some(UpstreamEvent::Begin {
            node_name: metadata.node_name,
        }),
        Ok(RawChunk::Item { content }) => {
            // Null content carries nothing; empty strings are meaningful
            // (the upstream signalling it is alive) and are kept.
            content.map(|content| UpstreamEvent::Item { content })
        }
        Ok(RawChunk::End { metadata }) => Some(UpstreamEvent::End {
            node_name: metadata.node_name,
        }),
        Ok(RawChunk::Error { message, content }) => Some(UpstreamEvent::Error {
            message: message
                .or(content)
                .unwrap_or_else(|| "Unknown error".to_string()),
        }),
        Err(err) => {
            if trimmed.starts_with('{') {
                // Malformed or unrecognized JSON: drop it rather than leak
                // half-parsed garbage to the client.
                debug!("Dropping unparseable upstream line: {}", err);
                None
            } else {
                // Forwarded verbatim, whitespace included
                Some(UpstreamEvent::PlainText {
                    line: line.to_string(),
                })
            }
        }
    }
}
