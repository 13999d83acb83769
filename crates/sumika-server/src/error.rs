//! JSON error envelope for the control surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use sumika_store::StoreError;

/// `{error: string, stats?: object}` with an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub stats: Option<serde_json::Value>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            stats: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            stats: None,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::Map::new();
        body.insert("error".to_string(), serde_json::Value::String(self.message));
        if let Some(stats) = self.stats {
            body.insert("stats".to_string(), stats);
        }
        (self.status, Json(serde_json::Value::Object(body))).into_response()
    }
}
