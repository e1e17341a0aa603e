//! Maps `mtce_core::MtceError` onto HTTP status codes (spec §7). Nothing
//! in `mtce-core` talks HTTP directly — this translation happens only
//! here, at the edge.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mtce_core::MtceError;
use serde_json::json;

pub struct ApiError(pub MtceError);

impl From<MtceError> for ApiError {
    fn from(e: MtceError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            MtceError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            MtceError::UnsupportedMedia(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg.clone()),
            MtceError::UpstreamNotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            MtceError::UpstreamAuth => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            MtceError::UpstreamTransient(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            MtceError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
            MtceError::TransformFailed(msg) => {
                log::error!("transform failed: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "transform failed".to_string())
            }
            MtceError::Io(e) => {
                log::error!("io error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            MtceError::Analytics(msg) => {
                log::error!("analytics error surfaced to a handler: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
