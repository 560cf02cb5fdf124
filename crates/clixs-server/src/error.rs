//! HTTP mapping for chat errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use clixs_core::ChatError;

use crate::session::Rejection;

/// A `ChatError` returned from a REST handler.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self(e)
    }
}

impl From<clixs_store::StoreError> for ApiError {
    fn from(e: clixs_store::StoreError) -> Self {
        Self(e.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ChatError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ChatError::NotParticipant => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::ConversationClosed => StatusCode::CONFLICT,
            ChatError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ChatError::Transport(_) | ChatError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.0.is_client_error() {
            self.0.to_string()
        } else {
            error!(kind = self.0.kind(), error = %self.0, "request failed");
            "internal server error".to_string()
        };
        let body = json!({ "error": self.0.kind(), "message": message });
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = match self.close_code {
            Some(code) => json!({ "error": self.error.kind(), "close_code": code.code() }),
            None => {
                error!(error = %self.error, "handshake failed");
                json!({ "error": self.error.kind() })
            }
        };
        (self.status, Json(body)).into_response()
    }
}
