use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::mpsc,
    time::{self, timeout, Instant},
};
use tracing::{debug, info, warn};

use crate::config::RelaySettings;
use crate::relay::client::Frame;
use crate::relay::room::Room;
use crate::relay::{split_frame, unix_now, EventKind, InboundEvent};

/// The socket side of a registered client: one read task, one write task.
#[derive(Debug, Clone)]
pub struct Connection {
    client_id: String,
    username: String,
    room: Room,
    settings: Arc<RelaySettings>,
}

impl Connection {
    pub fn new(
        client_id: String,
        username: String,
        room: Room,
        settings: Arc<RelaySettings>,
    ) -> Connection {
        Connection {
            client_id,
            username,
            room,
            settings,
        }
    }

    /// Pumps the socket until either side gives up, then leaves the room.
    ///
    /// `outbound` is the consumer half of the queue the room feeds; when the
    /// room drops this client the queue closes and the write task sends a
    /// close frame.
    pub async fn run(self, socket: WebSocket, outbound: mpsc::Receiver<Frame>) {
        let (sink, stream) = socket.split();

        let mut write_task = tokio::spawn(write_loop(sink, outbound, self.settings.clone()));
        let reader = self.clone();
        let mut read_task = tokio::spawn(async move { reader.read_loop(stream).await });

        let writer_done = tokio::select! {
            _ = &mut write_task => {
                read_task.abort();
                true
            }
            _ = &mut read_task => false,
        };

        self.room.unregister(&self.client_id);

        if !writer_done {
            // the room closes our queue once the unregister is processed
            let grace = self.settings.write_timeout * 2;
            if timeout(grace, &mut write_task).await.is_err() {
                write_task.abort();
            }
        }
        debug!(client = %self.client_id, room = %self.room.id(), "connection finished");
    }

    async fn read_loop(&self, mut stream: SplitStream<WebSocket>) {
        loop {
            // every frame, pongs included, re-arms the deadline
            let message = match timeout(self.settings.read_timeout, stream.next()).await {
                Err(_) => {
                    info!(client = %self.client_id, "read deadline exceeded, dropping client");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    debug!(client = %self.client_id, "websocket read failed: {e}");
                    break;
                }
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => {
                    for segment in split_frame(&text) {
                        self.handle_segment(segment).await;
                    }
                }
                Message::Close(frame) => {
                    log_close(&self.client_id, frame.as_ref());
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    debug!(client = %self.client_id, "ignoring binary frame");
                }
            }
        }
    }

    async fn handle_segment(&self, segment: &str) {
        let mut event = match InboundEvent::parse(segment) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(client = %self.client_id, "dropping event with unknown type");
                return;
            }
            Err(e) => {
                warn!(client = %self.client_id, "dropping frame: {e}");
                return;
            }
        };
        event.stamp(&self.client_id, self.room.id(), unix_now());
        dispatch(&self.room, &self.client_id, &self.username, event).await;
    }
}

/// Routes a stamped client event into its room.
///
/// Chat goes through the broadcast queue and echoes to the sender; every
/// other event is handed directly to the other members.
pub async fn dispatch(room: &Room, sender_id: &str, username: &str, mut event: InboundEvent) {
    match event.kind {
        EventKind::Drawing => {
            let drawing_type = event
                .get("drawingType")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            debug!(client = %sender_id, drawing_type, "drawing event");
        }
        EventKind::Chat => {
            event.stamp_default("username", username);
            debug!(client = %sender_id, "chat message");
            room.broadcast(event.encode()).await;
            return;
        }
        EventKind::Presence => {
            if let Some(payload) = event.payload() {
                room.update_presence(sender_id, payload).await;
            }
        }
        EventKind::CanvasUpdate => {
            if let Some(image_data) = event.image_data() {
                room.update_canvas_state(image_data.to_string()).await;
            }
        }
    }
    room.fan_out_except(sender_id, event.encode()).await;
}

fn log_close(client_id: &str, frame: Option<&CloseFrame<'_>>) {
    match frame.map(|frame| frame.code) {
        None | Some(close_code::NORMAL) | Some(close_code::AWAY) | Some(close_code::ABNORMAL) => {
            debug!(client = %client_id, "client closed the connection");
        }
        Some(code) => {
            warn!(client = %client_id, code, "unexpected close");
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    settings: Arc<RelaySettings>,
) {
    let period = settings.ping_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(first) = next else {
                    let _ = write_frame(&mut sink, Message::Close(None), settings.write_timeout).await;
                    break;
                };
                let text = coalesce(first, &mut outbound, settings.queue_capacity);
                if !write_frame(&mut sink, Message::Text(text), settings.write_timeout).await {
                    break;
                }
            }
            _ = ticker.tick() => {
                if !write_frame(&mut sink, Message::Ping(Vec::new()), settings.write_timeout).await {
                    break;
                }
            }
        }
    }
}

async fn write_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    deadline: Duration,
) -> bool {
    match timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("websocket write failed: {e}");
            false
        }
        Err(_) => {
            warn!("websocket write deadline exceeded");
            false
        }
    }
}

/// Joins `first` with whatever is already waiting in the queue, newline
/// separated, taking at most `limit` messages.
fn coalesce(first: Frame, outbound: &mut mpsc::Receiver<Frame>, limit: usize) -> String {
    let mut text = String::from(&*first);
    for _ in 1..limit {
        match outbound.try_recv() {
            Ok(next) => {
                text.push('\n');
                text.push_str(&next);
            }
            Err(_) => break,
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::client::Client;
    use crate::relay::room::RoomInfo;

    fn frame(s: &str) -> Frame {
        Frame::from(s)
    }

    #[tokio::test]
    async fn test_coalesce_drains_buffered_messages() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.try_send(frame("b")).unwrap();
        tx.try_send(frame("c")).unwrap();

        assert_eq!(coalesce(frame("a"), &mut rx, 8), "a\nb\nc");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_coalesce_respects_limit() {
        let (tx, mut rx) = mpsc::channel(8);
        for s in ["b", "c", "d"] {
            tx.try_send(frame(s)).unwrap();
        }

        assert_eq!(coalesce(frame("a"), &mut rx, 2), "a\nb");
        assert_eq!(rx.try_recv().ok().as_deref(), Some("c"));
    }

    async fn room_with(ids: &[&str]) -> (Room, Vec<mpsc::Receiver<Frame>>) {
        let (vacated, _) = mpsc::unbounded_channel();
        let room = Room::spawn(
            RoomInfo {
                id: "r1".into(),
                name: "Test".into(),
                created_at: 0,
                max_users: 10,
                is_private: false,
                password: None,
            },
            &RelaySettings::default(),
            vacated,
        );
        let mut receivers = Vec::new();
        for id in ids {
            let (tx, rx) = mpsc::channel(64);
            room.register(Client::new(id.to_string(), id.to_string(), tx))
                .await
                .unwrap();
            receivers.push(rx);
        }
        (room, receivers)
    }

    async fn collect_types(rx: &mut mpsc::Receiver<Frame>, kind: &str) -> Vec<Value> {
        let mut found = Vec::new();
        while let Ok(Some(frame)) = timeout(Duration::from_millis(100), rx.recv()).await {
            let value: Value = serde_json::from_str(&frame).unwrap();
            if value["type"] == kind {
                found.push(value);
            }
        }
        found
    }

    fn event(json: &str) -> InboundEvent {
        let mut event = InboundEvent::parse(json).unwrap().unwrap();
        event.stamp("alice", "r1", 42);
        event
    }

    #[tokio::test]
    async fn test_dispatch_drawing_skips_sender() {
        let (room, mut rx) = room_with(&["alice", "bob"]).await;

        dispatch(&room, "alice", "alice", event(r#"{"type":"drawing","drawingType":"stroke"}"#))
            .await;

        let bob = collect_types(&mut rx[1], "drawing").await;
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0]["userId"], "alice");
        assert!(collect_types(&mut rx[0], "drawing").await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_chat_echoes_with_username() {
        let (room, mut rx) = room_with(&["alice", "bob"]).await;

        dispatch(&room, "alice", "Alice", event(r#"{"type":"chat","message":"hi"}"#)).await;

        let echo = collect_types(&mut rx[0], "chat").await;
        assert_eq!(echo.len(), 1);
        assert_eq!(echo[0]["username"], "Alice");
        assert_eq!(echo[0]["roomId"], "r1");
        assert_eq!(collect_types(&mut rx[1], "chat").await.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_canvas_update_stores_snapshot() {
        let (room, mut rx) = room_with(&["alice", "bob"]).await;

        dispatch(
            &room,
            "alice",
            "alice",
            event(r#"{"type":"canvasUpdate","payload":{"imageData":"DATA1"}}"#),
        )
        .await;

        assert_eq!(room.canvas().await.image_data, "DATA1");
        assert_eq!(collect_types(&mut rx[1], "canvasUpdate").await.len(), 1);
        assert!(collect_types(&mut rx[0], "canvasUpdate").await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_presence_updates_sender() {
        let (room, mut rx) = room_with(&["alice", "bob"]).await;

        dispatch(
            &room,
            "alice",
            "alice",
            event(r#"{"type":"presence","payload":{"x":10,"y":20,"tool":"eraser"}}"#),
        )
        .await;

        let users = room.users().await;
        let alice = users.iter().find(|u| u.id == "alice").unwrap();
        assert_eq!((alice.presence.x, alice.presence.y), (10.0, 20.0));
        assert_eq!(collect_types(&mut rx[1], "presence").await.len(), 1);
        assert!(collect_types(&mut rx[0], "presence").await.is_empty());
    }
}
