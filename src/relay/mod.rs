pub mod api;
pub mod appstate;
pub mod canvas;
pub mod client;
pub mod connection;
pub mod registry;
pub mod room;
pub mod server;

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{RelayError, RelayResult};
use crate::relay::canvas::Canvas;
use crate::relay::client::{Frame, UserEntry};

/// Id of the always-present public room used when a client names no room.
pub const DEFAULT_ROOM_ID: &str = "default-collaboration-room";

/// Current time in unix seconds, as stamped on every relayed event.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The messages the server originates itself.
///
/// Client events (drawing, chat, presence, canvasUpdate) are relayed as the
/// stamped JSON the client sent and never pass through this type.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage<'a> {
    CanvasState { canvas: &'a Canvas, timestamp: i64 },
    UserCount { count: usize, timestamp: i64 },
    UserList { users: Vec<UserEntry>, timestamp: i64 },
    Error { message: String },
}

impl ServerMessage<'_> {
    pub fn encode(&self) -> serde_json::Result<Frame> {
        serde_json::to_string(self).map(Frame::from)
    }
}

/// The client event types the relay understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Drawing,
    Chat,
    Presence,
    CanvasUpdate,
}

impl EventKind {
    fn from_type(kind: &str) -> Option<EventKind> {
        match kind {
            "drawing" => Some(EventKind::Drawing),
            "chat" => Some(EventKind::Chat),
            "presence" => Some(EventKind::Presence),
            "canvasUpdate" => Some(EventKind::CanvasUpdate),
            _ => None,
        }
    }
}

/// A decoded client event. The body is always a JSON object.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub kind: EventKind,
    body: Value,
}

impl InboundEvent {
    /// Decodes one JSON segment.
    ///
    /// Returns `Ok(None)` for objects with a missing or unknown `type`; those
    /// are dropped silently.
    pub fn parse(segment: &str) -> RelayResult<Option<InboundEvent>> {
        let body: Value = serde_json::from_str(segment)?;
        if !body.is_object() {
            return Err(RelayError::NotAnObject);
        }
        let kind = body
            .get("type")
            .and_then(Value::as_str)
            .and_then(EventKind::from_type);

        Ok(kind.map(|kind| InboundEvent { kind, body }))
    }

    /// Overwrites the sender identity and the timestamp.
    pub fn stamp(&mut self, user_id: &str, room_id: &str, timestamp: i64) {
        self.body["userId"] = json!(user_id);
        self.body["roomId"] = json!(room_id);
        self.body["timestamp"] = json!(timestamp);
    }

    /// Sets `key` only when the client did not supply it.
    pub fn stamp_default(&mut self, key: &str, value: &str) {
        if self.body.get(key).is_none() {
            self.body[key] = json!(value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn payload(&self) -> Option<&Value> {
        self.body.get("payload")
    }

    /// `payload.imageData` of a canvasUpdate, if it is a string.
    pub fn image_data(&self) -> Option<&str> {
        self.payload()?.get("imageData")?.as_str()
    }

    pub fn encode(&self) -> Frame {
        Frame::from(self.body.to_string())
    }
}

/// Splits a text frame into its newline-separated JSON segments.
pub fn split_frame(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_type() {
        let event = InboundEvent::parse(r#"{"type":"chat","message":"hi"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::Chat);
        assert_eq!(event.get("message").and_then(Value::as_str), Some("hi"));
    }

    #[test]
    fn test_parse_unknown_or_missing_type_is_dropped() {
        assert!(InboundEvent::parse(r#"{"type":"teleport"}"#)
            .unwrap()
            .is_none());
        assert!(InboundEvent::parse(r#"{"message":"hi"}"#).unwrap().is_none());
        assert!(InboundEvent::parse(r#"{"type":5}"#).unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            InboundEvent::parse("not json"),
            Err(RelayError::Malformed(_))
        ));
        assert!(matches!(
            InboundEvent::parse("[1,2]"),
            Err(RelayError::NotAnObject)
        ));
    }

    #[test]
    fn test_stamp_overwrites_identity() {
        let mut event = InboundEvent::parse(
            r#"{"type":"drawing","userId":"forged","roomId":"elsewhere","timestamp":1}"#,
        )
        .unwrap()
        .unwrap();
        event.stamp("u1", "room-a", 1700000000);

        let value: Value = serde_json::from_str(&event.encode()).unwrap();
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["roomId"], "room-a");
        assert_eq!(value["timestamp"], 1700000000);
        assert_eq!(value["type"], "drawing");
    }

    #[test]
    fn test_stamp_default_keeps_client_value() {
        let mut event = InboundEvent::parse(r#"{"type":"chat","username":"bob"}"#)
            .unwrap()
            .unwrap();
        event.stamp_default("username", "alice");
        assert_eq!(event.get("username").and_then(Value::as_str), Some("bob"));
    }

    #[test]
    fn test_image_data() {
        let event = InboundEvent::parse(r#"{"type":"canvasUpdate","payload":{"imageData":"DATA1"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.image_data(), Some("DATA1"));

        let event = InboundEvent::parse(r#"{"type":"canvasUpdate","payload":{"imageData":3}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.image_data(), None);
    }

    #[test]
    fn test_split_frame() {
        let segments: Vec<_> = split_frame("{\"a\":1}\n{\"b\":2}\n\n").collect();
        assert_eq!(segments, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_error_message_shape() {
        let frame = ServerMessage::Error {
            message: "Room is full".into(),
        }
        .encode()
        .unwrap();
        assert_eq!(&*frame, r#"{"type":"error","message":"Room is full"}"#);
    }

    #[test]
    fn test_user_count_shape() {
        let frame = ServerMessage::UserCount {
            count: 3,
            timestamp: 9,
        }
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "userCount");
        assert_eq!(value["count"], 3);
    }
}
