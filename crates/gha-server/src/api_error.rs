//! HTTP API error type.
//!
//! Every failure is rendered as
//! `{"status": "error", "error": {"kind", "message"}, "tools_responses", "session_id"?}`
//! so clients can tell a fatal turn failure apart from a tool-level error
//! recorded inside a successful turn's trace.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gha_agent::TurnError;
use gha_core::error::ErrorKind;
use gha_core::types::{SessionToken, ToolTrace};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed `Authorization` header.
    #[error("{0}")]
    Unauthorized(String),

    /// The request body could not be parsed.
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Turn(#[from] TurnError),
}

#[derive(Serialize)]
struct ErrorDetail {
    kind: ErrorKind,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    error: ErrorDetail,
    tools_responses: ToolTrace,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<SessionToken>,
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Unauthorized(_) => ErrorKind::Authentication,
            ApiError::BadRequest(_) => ErrorKind::InvalidInput,
            ApiError::Turn(e) => e.kind(),
        }
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::NotFound | ErrorKind::BranchNotFound | ErrorKind::CacheMiss => {
            StatusCode::NOT_FOUND
        }
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::ExternalApi | ErrorKind::Timeout => StatusCode::BAD_GATEWAY,
        ErrorKind::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        let message = self.to_string();
        let (tools_responses, session_id) = match self {
            ApiError::Turn(e) => (e.tools_responses, e.session),
            _ => (ToolTrace::new(), None),
        };

        if status.is_server_error() {
            tracing::error!(%kind, error = %message, "request failed");
        } else {
            tracing::warn!(%kind, error = %message, "request rejected");
        }

        let body = ErrorBody {
            status: "error",
            error: ErrorDetail { kind, message },
            tools_responses,
            session_id,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    async fn body_of(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unauthorized_shape() {
        let response = ApiError::Unauthorized("missing bearer token".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = body_of(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"]["kind"], "authentication");
        assert_eq!(body["error"]["message"], "missing bearer token");
        assert_eq!(body["tools_responses"], serde_json::json!({}));
        assert!(body.get("session_id").is_none());
    }

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(status_for(ErrorKind::BranchNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::PermissionDenied), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::ExternalApi), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::Persistence), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
