//! Incremental UTF-8 decoding across arbitrary chunk boundaries

use log::warn;

/// Longest prefix of an incomplete UTF-8 character that may be carried
/// between reads. A valid incomplete sequence is at most 3 bytes; anything
/// longer means the bytes will never complete.
const MAX_PENDING: usize = 4;

/// Incremental UTF-8 decoder
///
/// Feeds of raw bytes may split a multi-byte character anywhere. The
/// decoder returns the maximal valid text prefix per feed and carries the
/// undecoded tail to the next call. Invalid sequences are replaced with
/// U+FFFD and decoding resumes after them; the stream is never corrupted
/// or aborted by bad bytes.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    /// Bytes that did not yet decode to a complete character
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create a new decoder with no pending bytes
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning all text decodable so far
    pub fn feed(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    if let Ok(prefix) = std::str::from_utf8(&self.pending[..valid]) {
                        out.push_str(prefix);
                    }

                    match err.error_len() {
                        Some(invalid) => {
                            // Invalid sequence: substitute one placeholder
                            // and continue after it.
                            warn!(
                                "Invalid UTF-8 sequence of {} byte(s) in upstream stream, substituting U+FFFD",
                                invalid
                            );
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        None => {
                            // Incomplete trailing character: keep the tail
                            // for the next feed.
                            self.pending.drain(..valid);
                            if self.pending.len() >= MAX_PENDING {
                                warn!(
                                    "Pending UTF-8 tail of {} bytes cannot complete, substituting U+FFFD",
                                    self.pending.len()
                                );
                                out.push(char::REPLACEMENT_CHARACTER);
                                self.pending.clear();
                            }
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Number of bytes currently carried between feeds
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Flush the decoder at end of stream
    ///
    /// A tail that never completed becomes a single placeholder character.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }

        warn!(
            "Upstream stream ended mid-character ({} pending byte(s)), substituting U+FFFD",
            self.pending.len()
        );
        self.pending.clear();
        Some(char::REPLACEMENT_CHARACTER.to_string())
    }
}
