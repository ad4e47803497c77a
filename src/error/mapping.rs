//! Mapping of upstream HTTP responses to relay errors
//!
//! The upstream webhook is a black box: error bodies may be JSON, plain
//! text, or empty. These helpers normalize whatever comes back into a
//! `RelayError` and classify statuses for the retry path.

use reqwest::StatusCode;
use serde_json::Value;

use super::RelayError;

/// Map a non-success upstream response to a RelayError
///
/// Tries to pull a human-readable message out of a JSON body first, then
/// falls back to the raw body or the status line.
pub fn map_upstream_error(status: StatusCode, body: &str) -> RelayError {
    let message = extract_message(body).unwrap_or_else(|| {
        if body.is_empty() {
            status.to_string()
        } else if body.len() > 200 {
            format!("{}: {:.200}...", status, body)
        } else {
            format!("{}: {}", status, body)
        }
    });

    RelayError::upstream(status.as_u16(), message)
}

/// Pull an error message out of a JSON error body, if there is one
fn extract_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    json.get("message")
        .or_else(|| json.get("error"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

/// Determine whether an HTTP status indicates a transient failure
///
/// The upstream fronts a workflow engine whose routing hiccups can
/// surface as any status, so every non-success initial response is worth
/// another attempt.
pub fn is_transient_status(status: u16) -> bool {
    !(200..300).contains(&status)
}

/// Classify an HTTP status by category, for log lines
pub fn classify_status(status: u16) -> &'static str {
    match status {
        400 => "validation",
        401 => "authentication",
        403 => "authorization",
        404 => "not_found",
        408 => "timeout",
        429 => "rate_limit",
        500..=599 => "server",
        _ => "unknown",
    }
}
