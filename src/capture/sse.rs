// src/capture/sse.rs
//! Server-sent event framing

use crate::instrumentation::event::CapturedEvent;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;

/// Comment written when a stream has been idle for the keep-alive interval
pub const KEEP_ALIVE_COMMENT: &str = "keep-alive";

/// Encode one SSE message.
///
/// Every line of `data` becomes its own `data:` field so multi-line payloads
/// survive the framing.
pub fn encode(id: Option<u64>, event: Option<&str>, data: &str) -> String {
    let mut frame = String::with_capacity(data.len() + 32);
    if let Some(id) = id {
        frame.push_str(&format!("id: {}\n", id));
    }
    if let Some(event) = event {
        frame.push_str("event: ");
        frame.push_str(event);
        frame.push('\n');
    }
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line.strip_suffix('\r').unwrap_or(line));
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// One message per captured event: `id`, `event: <kind>`, `data: <json>`
pub fn event_frame(id: u64, event: &CapturedEvent) -> Result<Bytes> {
    let data = serde_json::to_string(event).map_err(|e| {
        EngineError::Transport(format!("Failed to serialize {} event: {}", event.kind, e))
    })?;
    Ok(Bytes::from(encode(Some(id), Some(&event.kind), &data)))
}

/// SSE comment line, ignored by clients
pub fn comment(text: &str) -> Bytes {
    Bytes::from(format!(": {}\n\n", text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_line_frame() {
        let frame = encode(Some(3), Some("demo.UserGuess"), "{\"guess\":4}");
        assert_eq!(frame, "id: 3\nevent: demo.UserGuess\ndata: {\"guess\":4}\n\n");
    }

    #[test]
    fn test_multi_line_data() {
        let frame = encode(None, None, "first\r\nsecond\nthird");
        assert_eq!(frame, "data: first\ndata: second\ndata: third\n\n");
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        assert_eq!(encode(Some(12), None, ""), "id: 12\ndata: \n\n");
        assert_eq!(encode(None, Some("tick"), "x"), "event: tick\ndata: x\n\n");
    }

    #[test]
    fn test_event_frame_carries_kind_and_payload() {
        let event = CapturedEvent::new("runtime.CPULoad", json!({ "processLoad": 0.25 }));
        let frame = event_frame(7, &event).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();

        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("id: 7"));
        assert_eq!(lines.next(), Some("event: runtime.CPULoad"));

        let data = lines.next().unwrap().strip_prefix("data: ").unwrap();
        let decoded: CapturedEvent = serde_json::from_str(data).unwrap();
        assert_eq!(decoded.kind, "runtime.CPULoad");
        assert_eq!(decoded.payload["processLoad"], 0.25);
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_comment() {
        assert_eq!(comment(KEEP_ALIVE_COMMENT), Bytes::from_static(b": keep-alive\n\n"));
    }
}
