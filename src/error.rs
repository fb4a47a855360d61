use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Errors raised while admitting clients and decoding their frames.
///
/// Admission errors are reported back to the client as an `error` message
/// before the socket is closed; protocol errors only drop the offending frame.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Room not found")]
    RoomNotFound,

    #[error("Room is full")]
    RoomFull,

    #[error("Invalid room password")]
    InvalidPassword,

    /// The room was deleted while a request to it was in flight.
    #[error("Room is closed")]
    RoomClosed,

    /// The canvas snapshot could not be queued for a joining client.
    #[error("Could not join room")]
    JoinFailed,

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,
}

pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// The text placed in the `message` field of an `error` frame.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::RoomClosed => RelayError::RoomNotFound.to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let code = match self {
            RelayError::RoomNotFound | RelayError::RoomClosed => StatusCode::NOT_FOUND,
            RelayError::RoomFull => StatusCode::CONFLICT,
            RelayError::InvalidPassword => StatusCode::FORBIDDEN,
            RelayError::JoinFailed => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::Malformed(_) | RelayError::NotAnObject => StatusCode::BAD_REQUEST,
        };
        (code, Json(json!({ "error": self.client_message() }))).into_response()
    }
}
