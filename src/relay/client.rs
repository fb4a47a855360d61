use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// One encoded JSON message waiting in a client's outbound queue.
pub type Frame = Arc<str>;

/// The producer half of a client's bounded outbound queue.
///
/// The room owns the only `Outbound` of each member, so removing a member
/// from the room closes its queue and ends the write task.
pub type Outbound = mpsc::Sender<Frame>;

/// Live cursor and tool state of a client.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: String,
    pub username: String,
    pub x: f64,
    pub y: f64,
    pub color: String,
    pub tool: String,
}

impl Presence {
    pub const DEFAULT_COLOR: &'static str = "#000000";
    pub const DEFAULT_TOOL: &'static str = "brush";

    pub fn new(user_id: &str, username: &str) -> Presence {
        Presence {
            user_id: user_id.to_string(),
            username: username.to_string(),
            x: 0.0,
            y: 0.0,
            color: Self::DEFAULT_COLOR.to_string(),
            tool: Self::DEFAULT_TOOL.to_string(),
        }
    }

    /// Copies any of `x`, `y`, `color` and `tool` present in a presence
    /// payload. Fields of the wrong type are ignored.
    pub fn apply(&mut self, payload: &Value) {
        if let Some(x) = payload.get("x").and_then(Value::as_f64) {
            self.x = x;
        }
        if let Some(y) = payload.get("y").and_then(Value::as_f64) {
            self.y = y;
        }
        if let Some(color) = payload.get("color").and_then(Value::as_str) {
            self.color = color.to_string();
        }
        if let Some(tool) = payload.get("tool").and_then(Value::as_str) {
            self.tool = tool.to_string();
        }
    }
}

/// A roster entry as it appears in `userList` messages.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserEntry {
    pub id: String,
    pub username: String,
    pub presence: Presence,
}

/// A registered member of a room.
#[derive(Debug)]
pub struct Client {
    pub id: String,
    pub username: String,
    pub presence: Presence,
    outbound: Outbound,
}

impl Client {
    pub fn new(id: String, username: String, outbound: Outbound) -> Client {
        let presence = Presence::new(&id, &username);
        Client {
            id,
            username,
            presence,
            outbound,
        }
    }

    /// Username used when the client did not pick one.
    pub fn default_username(id: &str) -> String {
        let prefix: String = id.chars().take(8).collect();
        format!("User{prefix}")
    }

    /// Enqueues without waiting. Returns `false` when the queue is full or its
    /// write task is gone, which makes the client a slow consumer.
    pub fn try_deliver(&self, frame: Frame) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn entry(&self) -> UserEntry {
        UserEntry {
            id: self.id.clone(),
            username: self.username.clone(),
            presence: self.presence.clone(),
        }
    }
}
