use std::sync::Arc;

use crate::config::RelaySettings;
use crate::relay::registry::RoomRegistry;

/// State shared by every axum handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: RoomRegistry,
    pub settings: Arc<RelaySettings>,
}

impl AppState {
    /// Creates the registry and its janitor; call from within the runtime.
    pub fn new(settings: RelaySettings) -> AppState {
        AppState {
            registry: RoomRegistry::new(settings.clone()),
            settings: Arc::new(settings),
        }
    }
}
