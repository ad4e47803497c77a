//! Byte-stream reassembly for the upstream read loop
//!
//! The upstream transport hands us arbitrary byte chunks with no
//! alignment to character or line boundaries. `Utf8Decoder` turns those
//! chunks back into valid text, and `LineFramer` turns the text into
//! newline-delimited logical lines.

mod decoder;
mod framer;

pub use decoder::Utf8Decoder;
pub use framer::LineFramer;
