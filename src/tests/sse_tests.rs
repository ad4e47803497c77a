//! Tests for outbound SSE framing

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::event::UpstreamEvent;
    use crate::sse::{
        escape_content, unescape_content, EncoderConfig, OutboundFrame, SseEncoder, DONE_SENTINEL,
    };

    #[test]
    fn test_data_frame_wire_format() {
        let frame = OutboundFrame::data("hello");
        assert_eq!(frame.to_wire(), "data: hello\n\n");
    }

    #[test]
    fn test_content_newlines_escaped() {
        let frame = OutboundFrame::data("line one\nline two\r\n");
        assert_eq!(frame.to_wire(), "data: line one\\nline two\\r\\n\n\n");
    }

    #[test]
    fn test_escape_round_trip() {
        let original = "a\nb\rc";
        assert_eq!(unescape_content(&escape_content(original)), original);
    }

    #[test]
    fn test_done_frame() {
        assert_eq!(OutboundFrame::Done.to_wire(), "data: [DONE]\n\n");
        assert_eq!(DONE_SENTINEL, "[DONE]");
    }

    #[test]
    fn test_retry_frame_wire_format() {
        let frame = OutboundFrame::Retry {
            attempt: 1,
            max_attempts: 3,
            delay: Duration::from_secs(2),
        };
        let wire = frame.to_wire();
        assert!(wire.starts_with("event: retry\ndata: "));
        assert!(wire.contains("\"attempt\":1"));
        assert!(wire.contains("\"max_attempts\":3"));
        assert!(wire.contains("\"delay_ms\":2000"));
        assert!(wire.ends_with("\n\n"));
    }

    #[test]
    fn test_keep_alive_frame_wire_format() {
        let frame = OutboundFrame::KeepAlive { timestamp: 1234 };
        assert_eq!(
            frame.to_wire(),
            "event: heartbeat\ndata: {\"timestamp\":1234}\n\n"
        );
    }

    #[test]
    fn test_error_frame_is_json_payload() {
        let frame = OutboundFrame::error("it broke");
        let wire = frame.to_wire();
        assert_eq!(wire, "data: {\"error\":\"it broke\"}\n\n");
    }

    #[test]
    fn test_encoder_forwards_item_content() {
        let encoder = SseEncoder::default();
        let frames = encoder.encode(&UpstreamEvent::Item {
            content: "Hi".to_string(),
        });
        assert_eq!(frames, vec![OutboundFrame::Data("Hi".to_string())]);
    }

    #[test]
    fn test_encoder_keeps_empty_item_content() {
        let encoder = SseEncoder::default();
        let frames = encoder.encode(&UpstreamEvent::Item {
            content: String::new(),
        });
        assert_eq!(frames, vec![OutboundFrame::Data(String::new())]);
    }

    #[test]
    fn test_encoder_forwards_lifecycle_by_default() {
        let encoder = SseEncoder::default();
        let frames = encoder.encode(&UpstreamEvent::Begin {
            node_name: Some("llm".to_string()),
        });
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            OutboundFrame::Data(payload) => {
                let json: serde_json::Value = serde_json::from_str(payload).unwrap();
                assert_eq!(json["type"], "begin");
                assert_eq!(json["nodeName"], "llm");
            }
            other => panic!("expected data frame, got {:?}", other),
        }
    }

    #[test]
    fn test_encoder_suppresses_lifecycle_when_configured() {
        let encoder = SseEncoder::new(EncoderConfig {
            forward_lifecycle: false,
        });
        assert!(encoder
            .encode(&UpstreamEvent::Begin { node_name: None })
            .is_empty());
        assert!(encoder
            .encode(&UpstreamEvent::End { node_name: None })
            .is_empty());

        // Items are unaffected
        assert_eq!(
            encoder.encode(&UpstreamEvent::Item {
                content: "x".to_string()
            }),
            vec![OutboundFrame::Data("x".to_string())]
        );
    }

    #[test]
    fn test_encoder_plain_text_escaped() {
        let encoder = SseEncoder::default();
        let frames = encoder.encode(&UpstreamEvent::PlainText {
            line: "raw\ntext".to_string(),
        });
        assert_eq!(frames, vec![OutboundFrame::Data("raw\\ntext".to_string())]);
    }

    #[test]
    fn test_encoder_error_event() {
        let encoder = SseEncoder::default();
        let frames = encoder.encode(&UpstreamEvent::Error {
            message: "boom".to_string(),
        });
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], OutboundFrame::Error(_)));
    }

    #[test]
    fn test_content_classification() {
        assert!(OutboundFrame::data("x").is_content());
        assert!(!OutboundFrame::Done.is_content());
        assert!(!OutboundFrame::keep_alive().is_content());
        assert!(!OutboundFrame::error("e").is_content());
        assert!(!OutboundFrame::Retry {
            attempt: 1,
            max_attempts: 3,
            delay: Duration::from_secs(1)
        }
        .is_content());
    }
}
