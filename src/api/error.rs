//! API error taxonomy and the uniform JSON error envelope.
//!
//! Handlers return [`ApiError`]; the [`error_envelope`] layer rewrites every
//! typed error into `{error, status, path, timestamp}`. Store failures are
//! logged with their cause at the handler boundary and surface here only as
//! the generic internal variant, so nothing sensitive reaches a client.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or incomplete input.
    #[error("{0}")]
    Validation(String),

    /// Bad username or password. Deliberately identical for "no such user"
    /// and "wrong password"; only the logs distinguish the two.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The endpoint needs a credential the request did not carry.
    #[error("{0}")]
    AuthRequired(&'static str),

    /// Unknown, expired, and revoked tokens, uniformly.
    #[error("{0}")]
    InvalidToken(&'static str),

    /// Authenticated, but the current password check failed.
    #[error("Current password is incorrect")]
    CurrentPasswordMismatch,

    /// Role check failure.
    #[error("Admin privileges required")]
    PermissionDenied,

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(&'static str),

    #[error("Too many login attempts, please try again later")]
    RateLimited,

    /// Store or connection failure; the cause lives in the logs only.
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials
            | Self::AuthRequired(_)
            | Self::InvalidToken(_)
            | Self::CurrentPasswordMismatch => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Marker stashed in response extensions so [`error_envelope`] can rebuild
/// the body with the request path attached.
#[derive(Clone)]
struct ErrorDetail {
    message: String,
    status: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        let mut response = (
            status,
            Json(json!({ "error": message, "status": status.as_u16() })),
        )
            .into_response();
        response.extensions_mut().insert(ErrorDetail {
            message,
            status: status.as_u16(),
        });
        response
    }
}

/// Router layer that rewrites typed API errors into the uniform envelope.
pub async fn error_envelope(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    let response = next.run(request).await;

    let Some(detail) = response.extensions().get::<ErrorDetail>().cloned() else {
        return response;
    };

    (
        response.status(),
        Json(json!({
            "error": detail.message,
            "status": detail.status,
            "path": path,
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}
