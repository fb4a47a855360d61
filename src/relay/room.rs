use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::RelaySettings;
use crate::error::{RelayError, RelayResult};
use crate::relay::canvas::Canvas;
use crate::relay::client::{Client, Frame, UserEntry};
use crate::relay::{unix_now, ServerMessage, DEFAULT_ROOM_ID};

/// The immutable description of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub max_users: usize,
    pub is_private: bool,
    pub password: Option<String>,
}

/// Membership and canvas, guarded together by the room lock.
#[derive(Debug)]
pub struct RoomState {
    pub members: HashMap<String, Client>,
    pub canvas: Canvas,
}

#[derive(Debug)]
struct Shared {
    info: RoomInfo,
    state: RwLock<RoomState>,
}

impl Shared {
    /// Offers `frame` to every member except `except` without waiting.
    ///
    /// Returns the ids of members that could not take it.
    async fn deliver(&self, frame: &Frame, except: Option<&str>) -> Vec<String> {
        let state = self.state.read().await;
        let mut slow = Vec::new();
        for (id, client) in &state.members {
            if Some(id.as_str()) == except {
                continue;
            }
            if !client.try_deliver(frame.clone()) {
                slow.push(id.clone());
            }
        }
        slow
    }

    /// Removes slow consumers, closing their queues. Returns how many were
    /// still members.
    async fn evict(&self, client_ids: &[String]) -> usize {
        let mut state = self.state.write().await;
        let mut removed = 0;
        for id in client_ids {
            if state.members.remove(id).is_some() {
                warn!(room = %self.info.id, client = %id, "evicting slow consumer");
                removed += 1;
            }
        }
        removed
    }
}

#[derive(Debug)]
enum RoomCommand {
    Register {
        client: Client,
        ack: oneshot::Sender<RelayResult<()>>,
    },
    Unregister {
        client_id: String,
    },
    /// Members were evicted outside the event task.
    Departed,
    Close,
}

/// A handle to a collaboration room.
///
/// Cloning is cheap; all clones talk to the same event task, which serializes
/// registration, unregistration and the broadcast queue.
#[derive(Debug, Clone)]
pub struct Room {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<RoomCommand>,
    broadcast: mpsc::Sender<Frame>,
}

impl Room {
    /// Capacity used when a room is created without a positive limit.
    pub const DEFAULT_MAX_USERS: usize = 10;

    /// Starts the event task of a new room.
    ///
    /// `vacated` receives the room id every time the room becomes empty,
    /// except for the default room.
    pub fn spawn(
        info: RoomInfo,
        settings: &RelaySettings,
        vacated: mpsc::UnboundedSender<String>,
    ) -> Room {
        let canvas = Canvas::new(info.created_at, settings.history_limit);
        let shared = Arc::new(Shared {
            info,
            state: RwLock::new(RoomState {
                members: HashMap::new(),
                canvas,
            }),
        });
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (broadcast, broadcast_rx) = mpsc::channel(settings.queue_capacity.max(1));

        let task = EventTask {
            shared: shared.clone(),
            commands: command_rx,
            broadcast: broadcast_rx,
            roster: broadcast.clone(),
            vacated,
        };
        tokio::spawn(task.run());

        Room {
            shared,
            commands,
            broadcast,
        }
    }

    pub fn info(&self) -> &RoomInfo {
        &self.shared.info
    }

    pub fn id(&self) -> &str {
        &self.shared.info.id
    }

    pub fn max_users(&self) -> usize {
        self.shared.info.max_users
    }

    pub fn is_private(&self) -> bool {
        self.shared.info.is_private
    }

    pub fn check_password(&self, supplied: Option<&str>) -> RelayResult<()> {
        match self.shared.info.password.as_deref() {
            Some(expected) if !expected.is_empty() && supplied != Some(expected) => {
                Err(RelayError::InvalidPassword)
            }
            _ => Ok(()),
        }
    }

    pub async fn member_count(&self) -> usize {
        self.shared.state.read().await.members.len()
    }

    pub async fn is_member(&self, client_id: &str) -> bool {
        self.shared
            .state
            .read()
            .await
            .members
            .contains_key(client_id)
    }

    pub async fn canvas(&self) -> Canvas {
        self.shared.state.read().await.canvas.clone()
    }

    pub async fn users(&self) -> Vec<UserEntry> {
        let state = self.shared.state.read().await;
        state.members.values().map(Client::entry).collect()
    }

    /// Adds `client` to the room and waits until the event task has
    /// queued its canvas snapshot.
    pub async fn register(&self, client: Client) -> RelayResult<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(RoomCommand::Register { client, ack })
            .map_err(|_| RelayError::RoomClosed)?;
        done.await.map_err(|_| RelayError::RoomClosed)?
    }

    pub fn unregister(&self, client_id: &str) {
        let command = RoomCommand::Unregister {
            client_id: client_id.to_string(),
        };
        if self.commands.send(command).is_err() {
            debug!(room = %self.id(), client = %client_id, "room already closed");
        }
    }

    /// Queues `frame` for every member, sender included. Waits while the
    /// broadcast queue is full.
    pub async fn broadcast(&self, frame: Frame) {
        if self.broadcast.send(frame).await.is_err() {
            debug!(room = %self.id(), "broadcast on closed room dropped");
        }
    }

    /// Hands `frame` straight to every member but `sender_id`, evicting
    /// members whose queue is full.
    pub async fn fan_out_except(&self, sender_id: &str, frame: Frame) {
        let slow = self.shared.deliver(&frame, Some(sender_id)).await;
        if slow.is_empty() {
            return;
        }
        if self.shared.evict(&slow).await > 0 {
            let _ = self.commands.send(RoomCommand::Departed);
        }
    }

    pub async fn update_canvas_state(&self, image_data: String) {
        let mut state = self.shared.state.write().await;
        state.canvas.update(image_data, unix_now());
        debug!(
            room = %self.id(),
            history = state.canvas.history.len(),
            "canvas snapshot updated"
        );
    }

    pub async fn update_presence(&self, client_id: &str, payload: &Value) {
        let mut state = self.shared.state.write().await;
        if let Some(client) = state.members.get_mut(client_id) {
            client.presence.apply(payload);
        }
    }

    /// Stops the event task; every member queue is closed.
    pub fn close(&self) {
        let _ = self.commands.send(RoomCommand::Close);
    }
}

/// The single task that owns room lifecycle events.
struct EventTask {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<RoomCommand>,
    broadcast: mpsc::Receiver<Frame>,
    roster: mpsc::Sender<Frame>,
    vacated: mpsc::UnboundedSender<String>,
}

impl EventTask {
    async fn run(mut self) {
        debug!(room = %self.shared.info.id, "room event task started");
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(RoomCommand::Register { client, ack }) => self.register(client, ack).await,
                    Some(RoomCommand::Unregister { client_id }) => self.unregister(&client_id).await,
                    Some(RoomCommand::Departed) => self.after_departure().await,
                    Some(RoomCommand::Close) | None => break,
                },
                Some(frame) = self.broadcast.recv() => self.deliver_to_all(frame).await,
            }
        }

        let mut state = self.shared.state.write().await;
        state.members.clear();
        info!(room = %self.shared.info.id, "room closed");
    }

    async fn register(&self, client: Client, ack: oneshot::Sender<RelayResult<()>>) {
        let room_id = &self.shared.info.id;
        let mut state = self.shared.state.write().await;
        if state.members.len() >= self.shared.info.max_users {
            drop(state);
            let _ = ack.send(Err(RelayError::RoomFull));
            return;
        }

        let snapshot = ServerMessage::CanvasState {
            canvas: &state.canvas,
            timestamp: unix_now(),
        }
        .encode();
        let frame = match snapshot {
            Ok(frame) => frame,
            Err(e) => {
                error!(room = %room_id, "failed to encode canvas snapshot: {e}");
                drop(state);
                let _ = ack.send(Err(RelayError::JoinFailed));
                return;
            }
        };
        if !client.try_deliver(frame) {
            warn!(room = %room_id, client = %client.id, "client too slow for canvas snapshot");
            drop(state);
            let _ = ack.send(Err(RelayError::JoinFailed));
            return;
        }

        let client_id = client.id.clone();
        state.members.insert(client_id.clone(), client);
        info!(
            room = %room_id,
            client = %client_id,
            members = state.members.len(),
            "client joined"
        );
        drop(state);

        let _ = ack.send(Ok(()));
        self.publish_roster().await;
    }

    async fn unregister(&self, client_id: &str) {
        let removed = {
            let mut state = self.shared.state.write().await;
            let removed = state.members.remove(client_id).is_some();
            if removed {
                info!(
                    room = %self.shared.info.id,
                    client = %client_id,
                    members = state.members.len(),
                    "client left"
                );
            }
            removed
        };
        if removed {
            self.after_departure().await;
        }
    }

    async fn deliver_to_all(&self, frame: Frame) {
        let slow = self.shared.deliver(&frame, None).await;
        if !slow.is_empty() && self.shared.evict(&slow).await > 0 {
            self.after_departure().await;
        }
    }

    /// Schedules reclamation of an empty room, or tells the remaining
    /// members who is left.
    async fn after_departure(&self) {
        let empty = self.shared.state.read().await.members.is_empty();
        if !empty {
            self.publish_roster().await;
        } else if self.shared.info.id != DEFAULT_ROOM_ID {
            debug!(room = %self.shared.info.id, "room is empty, scheduling cleanup");
            let _ = self.vacated.send(self.shared.info.id.clone());
        }
    }

    /// Queues fresh `userCount` and `userList` messages. Dropped when the
    /// broadcast queue is full; a later update supersedes them.
    async fn publish_roster(&self) {
        let (count, list) = {
            let state = self.shared.state.read().await;
            let timestamp = unix_now();
            let count = ServerMessage::UserCount {
                count: state.members.len(),
                timestamp,
            }
            .encode();
            let list = ServerMessage::UserList {
                users: state.members.values().map(Client::entry).collect(),
                timestamp,
            }
            .encode();
            (count, list)
        };

        for frame in [count, list] {
            match frame {
                Ok(frame) => {
                    if self.roster.try_send(frame).is_err() {
                        debug!(room = %self.shared.info.id, "broadcast queue full, roster update dropped");
                    }
                }
                Err(e) => error!(room = %self.shared.info.id, "failed to encode roster: {e}"),
            }
        }
    }
}
