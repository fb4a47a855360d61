use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use tokio::{net::TcpListener, signal, sync::mpsc, time::timeout};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelaySettings;
use crate::error::{RelayError, RelayResult};
use crate::relay::api;
use crate::relay::appstate::AppState;
use crate::relay::client::Client;
use crate::relay::connection::Connection;
use crate::relay::registry::RoomRegistry;
use crate::relay::room::Room;
use crate::relay::ServerMessage;

/// Query parameters of the WebSocket handshake.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JoinParams {
    pub room_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Start the relay.
///
/// Binds `listen_addr:port`, serves the WebSocket endpoint and the room API,
/// and shuts down gracefully on Ctrl+C or SIGTERM.
pub async fn start_ws(port: u16, listen_addr: &str, settings: RelaySettings) -> anyhow::Result<()> {
    debug!("Server configured to accept connections on host {listen_addr}...");
    debug!("Server configured to listen connections on port {port}...");

    let state = AppState::new(settings);
    let app = router(state);

    let listener = TcpListener::bind(format!("{listen_addr}:{port}")).await?;
    info!("Listening on: {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

/// All routes of the relay.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/rooms", get(api::list_rooms).post(api::create_room))
        .route("/api/rooms/info", get(api::room_info))
        .route("/health", get(api::health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
}

/// Handler for the WebSocket route.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<JoinParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    debug!("Upgrading connection for room {:?}", params.room_id);
    ws.on_failed_upgrade(|error| warn!("websocket upgrade failed: {error}"))
        .on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// Admits the client, registers it and runs its connection.
async fn handle_socket(socket: WebSocket, params: JoinParams, state: AppState) {
    let room = match admit(&state.registry, &params).await {
        Ok(room) => room,
        Err(error) => return reject(socket, &error, &state.settings).await,
    };

    let client_id = Uuid::new_v4().to_string();
    let username = params
        .username
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| Client::default_username(&client_id));

    let (outbound, outbound_rx) = mpsc::channel(state.settings.queue_capacity.max(1));
    let client = Client::new(client_id.clone(), username.clone(), outbound);
    if let Err(error) = room.register(client).await {
        return reject(socket, &error, &state.settings).await;
    }
    debug!(client = %client_id, username = %username, room = %room.id(), "client admitted");

    Connection::new(client_id, username, room, state.settings.clone())
        .run(socket, outbound_rx)
        .await;
}

/// Resolves the room named in the handshake and checks it can take one more
/// member.
pub async fn admit(registry: &RoomRegistry, params: &JoinParams) -> RelayResult<Room> {
    let room = match params.room_id.as_deref().filter(|id| !id.is_empty()) {
        None => registry.default_room().await,
        Some(id) => registry.get(id).await.ok_or(RelayError::RoomNotFound)?,
    };
    room.check_password(params.password.as_deref())?;
    if room.member_count().await >= room.max_users() {
        return Err(RelayError::RoomFull);
    }
    Ok(room)
}

async fn reject(mut socket: WebSocket, error: &RelayError, settings: &RelaySettings) {
    info!("rejecting client: {error}");
    let message = ServerMessage::Error {
        message: error.client_message(),
    };
    if let Ok(frame) = message.encode() {
        let _ = timeout(
            settings.write_timeout,
            socket.send(Message::Text(frame.to_string())),
        )
        .await;
    }
    let _ = timeout(settings.write_timeout, socket.send(Message::Close(None))).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::registry::NewRoom;
    use crate::relay::DEFAULT_ROOM_ID;

    fn params(room_id: Option<&str>, password: Option<&str>) -> JoinParams {
        JoinParams {
            room_id: room_id.map(str::to_string),
            username: None,
            password: password.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_admit_defaults_to_default_room() {
        let registry = RoomRegistry::new(RelaySettings::default());

        let room = admit(&registry, &params(None, None)).await.unwrap();
        assert_eq!(room.id(), DEFAULT_ROOM_ID);
        let room = admit(&registry, &params(Some(""), None)).await.unwrap();
        assert_eq!(room.id(), DEFAULT_ROOM_ID);
        let room = admit(&registry, &params(Some(DEFAULT_ROOM_ID), None))
            .await
            .unwrap();
        assert_eq!(room.id(), DEFAULT_ROOM_ID);
    }

    #[tokio::test]
    async fn test_admit_unknown_room() {
        let registry = RoomRegistry::new(RelaySettings::default());

        let result = admit(&registry, &params(Some("does-not-exist"), None)).await;
        assert!(matches!(result, Err(RelayError::RoomNotFound)));
    }

    #[tokio::test]
    async fn test_admit_checks_password() {
        let registry = RoomRegistry::new(RelaySettings::default());
        let room = registry
            .create(NewRoom {
                is_private: true,
                password: Some("pw".into()),
                ..NewRoom::default()
            })
            .await;

        let wrong = admit(&registry, &params(Some(room.id()), Some("nope"))).await;
        assert!(matches!(wrong, Err(RelayError::InvalidPassword)));
        assert!(admit(&registry, &params(Some(room.id()), Some("pw")))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_admit_full_room() {
        let registry = RoomRegistry::new(RelaySettings::default());
        let room = registry
            .create(NewRoom {
                max_users: 1,
                ..NewRoom::default()
            })
            .await;
        let (tx, _rx) = mpsc::channel(16);
        room.register(Client::new("a".into(), "a".into(), tx))
            .await
            .unwrap();

        let result = admit(&registry, &params(Some(room.id()), None)).await;
        assert!(matches!(result, Err(RelayError::RoomFull)));
    }
}
