//! Tests for incremental UTF-8 decoding

#[cfg(test)]
mod tests {
    use crate::stream::Utf8Decoder;

    /// Feed a byte slice in chunks of the given size and collect all text
    fn feed_chunked(bytes: &[u8], chunk_size: usize) -> String {
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        for chunk in bytes.chunks(chunk_size) {
            out.push_str(&decoder.feed(chunk));
        }
        if let Some(tail) = decoder.finish() {
            out.push_str(&tail);
        }
        out
    }

    #[test]
    fn test_ascii_passthrough() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.feed(b"hello world"), "hello world");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_round_trip_under_arbitrary_fragmentation() {
        let text = "héllo wörld — καλημέρα 世界 🦀 done";
        let bytes = text.as_bytes();

        for chunk_size in 1..=bytes.len() {
            assert_eq!(
                feed_chunked(bytes, chunk_size),
                text,
                "chunk size {} corrupted the text",
                chunk_size
            );
        }
    }

    #[test]
    fn test_multibyte_split_across_feeds() {
        // "é" is 0xC3 0xA9; split it between two reads
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.feed(&[b'a', 0xC3]), "a");
        assert_eq!(decoder.pending_len(), 1);
        assert_eq!(decoder.feed(&[0xA9, b'b']), "éb");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_four_byte_character_split_three_ways() {
        // 🦀 is four bytes
        let bytes = "🦀".as_bytes();
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.feed(&bytes[..1]), "");
        assert_eq!(decoder.feed(&bytes[1..3]), "");
        assert_eq!(decoder.feed(&bytes[3..]), "🦀");
    }

    #[test]
    fn test_invalid_sequence_replaced_and_stream_resumes() {
        let mut decoder = Utf8Decoder::new();
        // 0xFF can never start a UTF-8 character
        let out = decoder.feed(&[b'a', 0xFF, b'b']);
        assert_eq!(out, "a\u{FFFD}b");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_multiple_invalid_bytes_each_replaced() {
        let mut decoder = Utf8Decoder::new();
        let out = decoder.feed(&[0xFF, 0xFE, b'x']);
        assert_eq!(out, "\u{FFFD}\u{FFFD}x");
    }

    #[test]
    fn test_truncated_tail_flushed_as_placeholder() {
        let mut decoder = Utf8Decoder::new();
        // Start of a three-byte character that never completes
        assert_eq!(decoder.feed(&[0xE4, 0xB8]), "");
        assert_eq!(decoder.pending_len(), 2);
        assert_eq!(decoder.finish(), Some("\u{FFFD}".to_string()));
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_finish_on_clean_decoder_is_none() {
        let mut decoder = Utf8Decoder::new();
        decoder.feed(b"clean");
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_empty_feed_is_harmless() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.feed(b""), "");
        assert_eq!(decoder.feed("日".as_bytes()), "日");
    }
}
