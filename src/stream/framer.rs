//! Newline framing of decoded text

/// Splits decoded text into newline-delimited logical lines
///
/// Lines are yielded only once fully received; a trailing unterminated
/// fragment stays buffered until the next feed or `finish`. A single
/// trailing `\r` is trimmed from each line so CRLF upstreams behave the
/// same as LF upstreams.
#[derive(Debug, Default)]
pub struct LineFramer {
    /// Text after the last newline seen so far
    buffer: String,
}

impl LineFramer {
    /// Create a new framer with an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed decoded text, returning every complete line in order
    pub fn feed(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=pos).collect();
            line.pop(); // the newline itself
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }

        lines
    }

    /// Text currently buffered past the last newline
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Flush the framer at end of stream
    ///
    /// Any remaining non-empty text is yielded as one final line.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }

        let mut line = std::mem::take(&mut self.buffer);
        if line.ends_with('\r') {
            line.pop();
        }
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }
}
