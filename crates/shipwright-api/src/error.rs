//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<shipwright_core::Error> for ApiError {
    fn from(err: shipwright_core::Error) -> Self {
        match err {
            shipwright_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            shipwright_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            shipwright_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            shipwright_core::Error::Conflict(msg) => ApiError::Conflict(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<shipwright_db::DbError> for ApiError {
    fn from(err: shipwright_db::DbError) -> Self {
        match err {
            shipwright_db::DbError::NotFound(msg) => ApiError::NotFound(msg),
            shipwright_db::DbError::Conflict(msg) => ApiError::Conflict(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_the_right_status() {
        let unauthorized: ApiError =
            shipwright_core::Error::Unauthorized("bad credential".to_string()).into();
        assert!(matches!(unauthorized, ApiError::Unauthorized(_)));

        let internal: ApiError =
            shipwright_core::Error::SynthesisFailed("apply refused".to_string()).into();
        assert!(matches!(internal, ApiError::Internal(_)));
    }

    #[test]
    fn db_not_found_maps_to_404() {
        let err: ApiError = shipwright_db::DbError::NotFound("service x".to_string()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
