//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Insufficient permissions")]
    Forbidden,

    // Conversation errors
    #[error("Not a participant of this conversation")]
    NotAParticipant,
    #[error("Conversation room not joined")]
    NotJoined,
    #[error("Conversation not found")]
    ConversationNotFound,
    #[error("Message not found")]
    MessageNotFound,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Storage temporarily unavailable")]
    StorageUnavailable,
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    /// Stable machine-readable code, shared by REST responses and the
    /// WebSocket `error` event.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidToken => "INVALID_TOKEN",
            ApiError::Unauthenticated => "UNAUTHENTICATED",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::NotAParticipant => "NOT_A_PARTICIPANT",
            ApiError::NotJoined => "NOT_JOINED",
            ApiError::ConversationNotFound => "CONVERSATION_NOT_FOUND",
            ApiError::MessageNotFound => "MESSAGE_NOT_FOUND",
            ApiError::Validation(_) => "VALIDATION_FAILED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::StorageUnavailable => "STORAGE_UNAVAILABLE",
            ApiError::Internal => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // Authentication
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),

            // Conversations
            ApiError::NotAParticipant => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::NotJoined => (StatusCode::CONFLICT, self.to_string()),
            ApiError::ConversationNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::MessageNotFound => (StatusCode::NOT_FOUND, self.to_string()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),

            // Internal
            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
            ),
            ApiError::StorageUnavailable => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::ConversationNotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ApiError::StorageUnavailable,
            sqlx::Error::Database(db_err) => ApiError::Database(db_err.to_string()),
            _ => ApiError::Database(err.to_string()),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ApiError::NotAParticipant.code(), "NOT_A_PARTICIPANT");
        assert_eq!(ApiError::ConversationNotFound.code(), "CONVERSATION_NOT_FOUND");
        assert_eq!(ApiError::MessageNotFound.code(), "MESSAGE_NOT_FOUND");
        assert_eq!(ApiError::StorageUnavailable.code(), "STORAGE_UNAVAILABLE");
    }

    #[test]
    fn test_pool_timeout_maps_to_storage_unavailable() {
        let err: ApiError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, ApiError::StorageUnavailable));
    }
}
