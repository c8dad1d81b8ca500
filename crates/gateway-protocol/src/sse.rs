use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::model::ContentResponse;

/// The three frame kinds the engine ever emits on a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEventKind {
    Content { response: String },
    End { response: ContentResponse },
    Error { code: String, message: String },
}

impl SseEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            SseEventKind::Content { .. } => "content",
            SseEventKind::End { .. } => "end",
            SseEventKind::Error { .. } => "error",
        }
    }

    fn data_json(&self) -> JsonValue {
        match self {
            SseEventKind::Content { response } => serde_json::json!({ "response": response }),
            SseEventKind::End { response } => serde_json::json!({ "response": response }),
            SseEventKind::Error { code, message } => {
                serde_json::json!({ "code": code, "message": message })
            }
        }
    }
}

/// A single framed event, as stored in the session/history hash and as sent on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub kind: SseEventKind,
    pub id: Uuid,
}

impl SseEvent {
    pub fn content(id: Uuid, response: impl Into<String>) -> Self {
        Self {
            kind: SseEventKind::Content {
                response: response.into(),
            },
            id,
        }
    }

    pub fn end(id: Uuid, response: ContentResponse) -> Self {
        Self {
            kind: SseEventKind::End { response },
            id,
        }
    }

    pub fn error(id: Uuid, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: SseEventKind::Error {
                code: code.into(),
                message: message.into(),
            },
            id,
        }
    }

    /// Produces the exact `event: ...\ndata: ...\nid: ...\n\n` byte sequence.
    pub fn encode(&self) -> Bytes {
        let data = serde_json::to_string(&self.kind.data_json()).unwrap_or_default();
        let frame = format!(
            "event: {}\ndata: {}\nid: {}\n\n",
            self.kind.name(),
            data,
            self.id
        );
        Bytes::from(frame.into_bytes())
    }
}

/// Serialized form used when persisting an event into the session/history hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredFrame {
    event: String,
    data: JsonValue,
    id: Uuid,
}

impl SseEvent {
    pub fn to_stored_json(&self) -> JsonValue {
        serde_json::to_value(StoredFrame {
            event: self.kind.name().to_string(),
            data: self.kind.data_json(),
            id: self.id,
        })
        .unwrap_or(JsonValue::Null)
    }

    pub fn from_stored_json(value: &JsonValue) -> Option<Self> {
        let stored: StoredFrame = serde_json::from_value(value.clone()).ok()?;
        decode_frame(Some(stored.event), stored.data.to_string(), Some(stored.id))
    }
}

/// Streaming, frame-boundary tolerant decoder: accumulates bytes until it sees a
/// blank line, then parses the preceding block into an event/data/id triple.
///
/// Mirrors the line-buffer accumulate-then-split approach used for other SSE
/// sources in this codebase, extended with an `id:` line and JSON-aware `data:`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    event: Option<String>,
    data_lines: Vec<String>,
    id: Option<Uuid>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines()
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk.as_bytes());
        self.drain_lines()
    }

    /// Flushes any trailing partial frame; call once the upstream source has closed.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = self.drain_lines();
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            self.consume_line(&line);
        }
        if let Some(event) = self.finish_event() {
            events.push(event);
        }
        events
    }

    fn drain_lines(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                break;
            };
            let raw = self.buffer.split_to(pos + 1);
            let mut line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                if let Some(event) = self.finish_event() {
                    events.push(event);
                }
                continue;
            }
            self.consume_line(&line);
        }
        events
    }

    fn consume_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        if let Some(value) = line.strip_prefix("event:") {
            let value = value.trim_start();
            self.event = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
            return;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data_lines.push(value.trim_start().to_string());
            return;
        }
        if let Some(value) = line.strip_prefix("id:") {
            self.id = Uuid::parse_str(value.trim_start()).ok();
        }
    }

    fn finish_event(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data_lines.is_empty() {
            self.id = None;
            return None;
        }
        let data = self.data_lines.join("\n");
        let event = self.event.take();
        let id = self.id.take();
        self.data_lines.clear();
        decode_frame(event, data, id)
    }
}

/// Decodes one already-split `(event, data, id)` triple into an [`SseEvent`].
///
/// `data` that is not valid JSON is surfaced as a raw-text `content` event,
/// tolerating malformed upstream chunks. Unrecognized event names are
/// dropped.
fn decode_frame(event: Option<String>, data: String, id: Option<Uuid>) -> Option<SseEvent> {
    let id = id.unwrap_or_else(Uuid::nil);
    match event.as_deref() {
        None | Some("content") => {
            let response = serde_json::from_str::<JsonValue>(&data)
                .ok()
                .and_then(|v| v.get("response").and_then(|r| r.as_str()).map(str::to_string))
                .unwrap_or(data);
            Some(SseEvent::content(id, response))
        }
        Some("end") => {
            let value: JsonValue = serde_json::from_str(&data).ok()?;
            let response: ContentResponse =
                serde_json::from_value(value.get("response")?.clone()).ok()?;
            Some(SseEvent::end(id, response))
        }
        Some("error") => {
            let value: JsonValue = serde_json::from_str(&data).ok()?;
            let code = value.get("code")?.as_str()?.to_string();
            let message = value.get("message")?.as_str()?.to_string();
            Some(SseEvent::error(id, code, message))
        }
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResponseResult;

    #[test]
    fn encode_content_is_bit_exact() {
        let id = Uuid::nil();
        let event = SseEvent::content(id, "hi");
        let bytes = event.encode();
        assert_eq!(
            bytes.as_ref(),
            b"event: content\ndata: {\"response\":\"hi\"}\nid: 00000000-0000-0000-0000-000000000000\n\n"
        );
    }

    #[test]
    fn round_trip_content_event() {
        let id = Uuid::new_v4();
        let event = SseEvent::content(id, "hello world");
        let mut decoder = SseDecoder::new();
        let decoded = decoder.push_bytes(&event.encode());
        assert_eq!(decoded, vec![event]);
    }

    #[test]
    fn round_trip_end_event() {
        let id = Uuid::new_v4();
        let response = ContentResponse {
            text: "done".to_string(),
            result: ResponseResult::Complete,
            session_id: crate::model::SessionId::new(),
        };
        let event = SseEvent::end(id, response);
        let mut decoder = SseDecoder::new();
        let decoded = decoder.push_bytes(&event.encode());
        assert_eq!(decoded, vec![event]);
    }

    #[test]
    fn round_trip_error_event() {
        let id = Uuid::new_v4();
        let event = SseEvent::error(id, "PROVIDER_RATE_LIMIT", "too many requests");
        let mut decoder = SseDecoder::new();
        let decoded = decoder.push_bytes(&event.encode());
        assert_eq!(decoded, vec![event]);
    }

    #[test]
    fn non_json_data_falls_back_to_raw_content() {
        let mut decoder = SseDecoder::new();
        let decoded = decoder.push_str(
            "event: content\ndata: plain text chunk\nid: 11111111-1111-1111-1111-111111111111\n\n",
        );
        assert_eq!(decoded.len(), 1);
        assert_eq!(
            decoded[0].kind,
            SseEventKind::Content {
                response: "plain text chunk".to_string()
            }
        );
    }

    #[test]
    fn unknown_event_is_dropped() {
        let mut decoder = SseDecoder::new();
        let decoded = decoder
            .push_str("event: ping\ndata: {}\nid: 11111111-1111-1111-1111-111111111111\n\n");
        assert!(decoded.is_empty());
    }

    #[test]
    fn empty_frame_yields_nothing() {
        let mut decoder = SseDecoder::new();
        let decoded = decoder.push_str("\n\n");
        assert!(decoded.is_empty());
    }

    #[test]
    fn decoder_tolerates_chunk_boundaries_mid_frame() {
        let id = Uuid::new_v4();
        let event = SseEvent::content(id, "split chunk");
        let bytes = event.encode();
        let mid = bytes.len() / 2;
        let mut decoder = SseDecoder::new();
        let mut decoded = decoder.push_bytes(&bytes.slice(..mid));
        assert!(decoded.is_empty());
        decoded.extend(decoder.push_bytes(&bytes.slice(mid..)));
        assert_eq!(decoded, vec![event]);
    }
}
