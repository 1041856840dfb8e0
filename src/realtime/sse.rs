//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary chunks; lines are assembled across chunk
//! boundaries and a blank line ends a frame.

use serde::Deserialize;

use super::RecordEvent;

/// Event name the server sends once per connection, carrying the client id.
pub const CONNECT_EVENT: &str = "PB_CONNECT";

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.finish();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn finish(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
            id,
        })
    }
}

/// What a frame means to the realtime client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Connection handshake; subscriptions must be posted for this id.
    Connect { client_id: String },
    /// A change on `collection`.
    Record {
        collection: String,
        event: RecordEvent,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectPayload {
    client_id: String,
}

/// Interpret a frame. Frames that are neither a handshake nor a well-formed
/// record event yield `None`.
pub fn decode_frame(frame: &SseFrame) -> Option<StreamMessage> {
    if frame.event == CONNECT_EVENT {
        let payload: ConnectPayload = serde_json::from_str(&frame.data).ok()?;
        return Some(StreamMessage::Connect {
            client_id: payload.client_id,
        });
    }
    // Topics are `collection/*` or `collection/<id>`.
    let collection = frame.event.split('/').next().unwrap_or_default();
    if collection.is_empty() {
        return None;
    }
    match serde_json::from_str::<RecordEvent>(&frame.data) {
        Ok(event) => Some(StreamMessage::Record {
            collection: collection.to_string(),
            event,
        }),
        Err(e) => {
            tracing::debug!(topic = %frame.event, error = %e, "ignoring undecodable frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::EventAction;

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: todos/*\nda").is_empty());
        assert!(decoder.push(b"ta: {\"action\":\"create\"}\n").is_empty());
        let frames = decoder.push(b"\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "todos/*".to_string(),
                data: "{\"action\":\"create\"}".to_string(),
                id: None,
            }]
        );
    }

    #[test]
    fn test_crlf_and_comments() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": ping\r\nid: 7\r\nevent: x\r\ndata: a\r\ndata: b\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "a\nb");
        assert_eq!(frames[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_frame_without_data_is_dropped() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: keepalive\n\n").is_empty());
        let frames = decoder.push(b"data: x\n\n");
        assert_eq!(frames[0].event, "message");
    }

    #[test]
    fn test_decode_connect() {
        let frame = SseFrame {
            event: CONNECT_EVENT.to_string(),
            data: r#"{"clientId":"abc123"}"#.to_string(),
            id: Some("abc123".to_string()),
        };
        assert_eq!(
            decode_frame(&frame),
            Some(StreamMessage::Connect {
                client_id: "abc123".to_string()
            })
        );
    }

    #[test]
    fn test_decode_record_event() {
        let frame = SseFrame {
            event: "todos/*".to_string(),
            data: r#"{"action":"update","record":{"id":"t1","collectionName":"todos"}}"#
                .to_string(),
            id: None,
        };
        match decode_frame(&frame) {
            Some(StreamMessage::Record { collection, event }) => {
                assert_eq!(collection, "todos");
                assert_eq!(event.action, EventAction::Update);
                assert_eq!(event.collection(), Some("todos"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage() {
        let frame = SseFrame {
            event: "todos/*".to_string(),
            data: "not json".to_string(),
            id: None,
        };
        assert_eq!(decode_frame(&frame), None);
    }
}
