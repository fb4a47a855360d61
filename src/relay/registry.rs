use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    sync::{mpsc, RwLock},
    time,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RelaySettings;
use crate::relay::room::{Room, RoomInfo};
use crate::relay::{unix_now, DEFAULT_ROOM_ID};

type RoomMap = Arc<RwLock<HashMap<String, Room>>>;

/// Parameters of a room created through the control plane.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NewRoom {
    pub name: String,
    pub max_users: i64,
    pub is_private: bool,
    pub password: Option<String>,
}

/// All rooms this process knows about.
///
/// Rooms report when they become empty; a janitor task reclaims them after
/// `cleanup_delay` unless someone joined in the meantime.
#[derive(Debug, Clone)]
pub struct RoomRegistry {
    rooms: RoomMap,
    settings: Arc<RelaySettings>,
    vacated: mpsc::UnboundedSender<String>,
}

impl RoomRegistry {
    pub const DEFAULT_ROOM_NAME: &'static str = "Default Collaboration Room";
    pub const DEFAULT_ROOM_MAX_USERS: usize = 50;
    pub const UNTITLED_ROOM_NAME: &'static str = "Untitled Room";

    /// Creates an empty registry and starts its janitor. Must be called
    /// inside a tokio runtime.
    pub fn new(settings: RelaySettings) -> RoomRegistry {
        let rooms: RoomMap = Arc::new(RwLock::new(HashMap::new()));
        let (vacated, vacated_rx) = mpsc::unbounded_channel();
        tokio::spawn(janitor(
            Arc::downgrade(&rooms),
            vacated_rx,
            settings.cleanup_delay,
        ));

        RoomRegistry {
            rooms,
            settings: Arc::new(settings),
            vacated,
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub async fn create(&self, request: NewRoom) -> Room {
        let name = if request.name.trim().is_empty() {
            Self::UNTITLED_ROOM_NAME.to_string()
        } else {
            request.name
        };
        let max_users = usize::try_from(request.max_users)
            .ok()
            .filter(|&n| n > 0)
            .unwrap_or(Room::DEFAULT_MAX_USERS);

        let info = RoomInfo {
            id: Uuid::new_v4().to_string(),
            name,
            created_at: unix_now(),
            max_users,
            is_private: request.is_private,
            password: request.password.filter(|p| !p.is_empty()),
        };
        let room = Room::spawn(info, &self.settings, self.vacated.clone());

        let mut rooms = self.rooms.write().await;
        rooms.insert(room.id().to_string(), room.clone());
        info!(room = %room.id(), name = %room.info().name, "room created");
        room
    }

    /// Looks up a room. The default room is created on first lookup.
    pub async fn get(&self, id: &str) -> Option<Room> {
        if id == DEFAULT_ROOM_ID {
            return Some(self.default_room().await);
        }
        self.rooms.read().await.get(id).cloned()
    }

    pub async fn default_room(&self) -> Room {
        if let Some(room) = self.rooms.read().await.get(DEFAULT_ROOM_ID) {
            return room.clone();
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(DEFAULT_ROOM_ID.to_string())
            .or_insert_with(|| {
                info!("creating default room");
                let info = RoomInfo {
                    id: DEFAULT_ROOM_ID.to_string(),
                    name: Self::DEFAULT_ROOM_NAME.to_string(),
                    created_at: unix_now(),
                    max_users: Self::DEFAULT_ROOM_MAX_USERS,
                    is_private: false,
                    password: None,
                };
                Room::spawn(info, &self.settings, self.vacated.clone())
            })
            .clone()
    }

    /// Public rooms, in no particular order.
    pub async fn list(&self) -> Vec<Room> {
        self.rooms
            .read()
            .await
            .values()
            .filter(|room| !room.is_private())
            .cloned()
            .collect()
    }

    /// Removes a room and closes every member queue. Returns `false` when
    /// there was no such room.
    pub async fn delete(&self, id: &str) -> bool {
        delete_room(&self.rooms, id).await
    }
}

async fn delete_room(rooms: &RwLock<HashMap<String, Room>>, id: &str) -> bool {
    let removed = rooms.write().await.remove(id);
    match removed {
        Some(room) => {
            room.close();
            info!(room = %id, "room deleted");
            true
        }
        None => false,
    }
}

/// Reclaims rooms that stayed empty for `delay`.
async fn janitor(
    rooms: Weak<RwLock<HashMap<String, Room>>>,
    mut vacated: mpsc::UnboundedReceiver<String>,
    delay: Duration,
) {
    while let Some(id) = vacated.recv().await {
        let rooms = rooms.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            let Some(rooms) = rooms.upgrade() else {
                return;
            };
            let room = rooms.read().await.get(&id).cloned();
            let Some(room) = room else {
                return;
            };
            if room.member_count().await > 0 {
                debug!(room = %id, "room repopulated, keeping it");
                return;
            }
            delete_room(&rooms, &id).await;
        });
    }
}
