use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RelayError, RelayResult};
use crate::relay::appstate::AppState;
use crate::relay::canvas::Canvas;
use crate::relay::registry::NewRoom;
use crate::relay::room::Room;

/// Response body of `POST /api/rooms`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRoom {
    pub id: String,
    pub name: String,
    pub max_users: usize,
    pub is_private: bool,
    pub created_at: i64,
}

/// One entry of `GET /api/rooms`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub user_count: usize,
    pub max_users: usize,
    pub created_at: i64,
}

/// Response body of `GET /api/rooms/info`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDetails {
    pub id: String,
    pub name: String,
    pub user_count: usize,
    pub max_users: usize,
    pub is_private: bool,
    pub created_at: i64,
    pub canvas: Canvas,
}

#[derive(Debug, Deserialize)]
pub struct RoomQuery {
    pub id: String,
}

pub async fn create_room(
    State(state): State<AppState>,
    Json(payload): Json<NewRoom>,
) -> impl IntoResponse {
    let room = state.registry.create(payload).await;
    let info = room.info();
    let body = CreatedRoom {
        id: info.id.clone(),
        name: info.name.clone(),
        max_users: info.max_users,
        is_private: info.is_private,
        created_at: info.created_at,
    };
    (StatusCode::CREATED, Json(body))
}

pub async fn list_rooms(State(state): State<AppState>) -> impl IntoResponse {
    let mut rooms = Vec::new();
    for room in state.registry.list().await {
        rooms.push(summary(&room).await);
    }
    debug!("listing {} public rooms", rooms.len());
    Json(rooms)
}

pub async fn room_info(
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
) -> RelayResult<Json<RoomDetails>> {
    let room = state
        .registry
        .get(&query.id)
        .await
        .ok_or(RelayError::RoomNotFound)?;
    let info = room.info();

    Ok(Json(RoomDetails {
        id: info.id.clone(),
        name: info.name.clone(),
        user_count: room.member_count().await,
        max_users: info.max_users,
        is_private: info.is_private,
        created_at: info.created_at,
        canvas: room.canvas().await,
    }))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn summary(room: &Room) -> RoomSummary {
    let info = room.info();
    RoomSummary {
        id: info.id.clone(),
        name: info.name.clone(),
        user_count: room.member_count().await,
        max_users: info.max_users,
        created_at: info.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelaySettings;
    use crate::relay::server::router;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_info() {
        let state = AppState::new(RelaySettings::default());

        let (status, created) = call(
            &state,
            post("/api/rooms", json!({"name": "Sketch", "maxUsers": 4})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["name"], "Sketch");
        assert_eq!(created["maxUsers"], 4);
        assert_eq!(created["isPrivate"], false);

        let id = created["id"].as_str().unwrap();
        let (status, info) = call(&state, get(&format!("/api/rooms/info?id={id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["userCount"], 0);
        assert_eq!(info["canvas"]["historyIndex"], -1);
    }

    #[tokio::test]
    async fn test_create_with_empty_body_fields() {
        let state = AppState::new(RelaySettings::default());

        let (status, created) = call(&state, post("/api/rooms", json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["name"], "Untitled Room");
        assert_eq!(created["maxUsers"], 10);
    }

    #[tokio::test]
    async fn test_list_only_public_rooms() {
        let state = AppState::new(RelaySettings::default());
        call(&state, post("/api/rooms", json!({"name": "open"}))).await;
        call(
            &state,
            post(
                "/api/rooms",
                json!({"name": "hidden", "isPrivate": true, "password": "pw"}),
            ),
        )
        .await;

        let (status, rooms) = call(&state, get("/api/rooms")).await;
        assert_eq!(status, StatusCode::OK);
        let rooms = rooms.as_array().unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0]["name"], "open");
        assert_eq!(rooms[0]["userCount"], 0);
    }

    #[tokio::test]
    async fn test_info_unknown_room() {
        let state = AppState::new(RelaySettings::default());

        let (status, body) = call(&state, get("/api/rooms/info?id=does-not-exist")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Room not found");
    }

    #[tokio::test]
    async fn test_health() {
        let state = AppState::new(RelaySettings::default());
        let response = router(state).oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }
}
