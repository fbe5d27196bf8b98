//! Session continuation and termination endpoints.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, info};

use super::{
    principal::authenticate,
    state::{AuthConfig, AuthState},
    types::{MessageResponse, SessionResponse, SessionUser},
    utils::{access_cookie, clear_access_cookie, clear_refresh_cookie, cookie_value,
        REFRESH_COOKIE_NAME},
};
use crate::api::error::ApiError;

#[utoipa::path(
    post,
    path = "/refresh-token",
    responses(
        (status = 200, description = "New access token issued", body = SessionResponse),
        (status = 401, description = "Missing, unknown, revoked, or expired refresh token")
    ),
    tag = "session"
)]
pub async fn refresh_token(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    let Some(token) = cookie_value(&headers, REFRESH_COOKIE_NAME) else {
        return Err(ApiError::AuthRequired("Refresh token required"));
    };

    let record = state
        .tokens()
        .find_valid_refresh_token(&token)
        .await
        .map_err(|err| {
            error!("Refresh token lookup failed: {err:#}");
            ApiError::Internal
        })?;

    // Unknown, revoked, and expired tokens are indistinguishable here, and a
    // deleted account invalidates its tokens the same way.
    let Some(record) = record else {
        return Err(ApiError::InvalidToken("Invalid refresh token"));
    };
    let user = state
        .credentials()
        .find_by_username(&record.username)
        .await
        .map_err(|err| {
            error!("Credential lookup failed: {err:#}");
            ApiError::Internal
        })?
        .ok_or(ApiError::InvalidToken("Invalid refresh token"))?;

    // The refresh token itself is not rotated; only the access token is
    // re-issued.
    let access = state.issuer().issue_access_token(&user).map_err(|err| {
        error!("Failed to issue access token: {err:#}");
        ApiError::Internal
    })?;

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = access_cookie(state.config(), &access.token, access.expires_in) {
        response_headers.append(SET_COOKIE, cookie);
    }

    let body = SessionResponse {
        message: "Token refreshed successfully".to_string(),
        user: SessionUser::from(&user),
        token: access.token,
        expires_in: access.expires_in,
    };
    Ok((StatusCode::OK, response_headers, Json(body)).into_response())
}

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 200, description = "Session ended; cookies cleared", body = MessageResponse)
    ),
    tag = "session"
)]
pub async fn logout(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
) -> Response {
    // Best effort: the client-side session ends regardless of the outcome,
    // which also makes repeated logouts harmless.
    if let Some(token) = cookie_value(&headers, REFRESH_COOKIE_NAME) {
        if let Err(err) = state.tokens().revoke_refresh_token(&token).await {
            error!("Failed to revoke refresh token: {err:#}");
        }
    }

    (
        StatusCode::OK,
        clear_session_cookies(state.config()),
        Json(MessageResponse {
            message: "Logout successful".to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/logout-all",
    responses(
        (status = 200, description = "All refresh tokens revoked", body = MessageResponse),
        (status = 401, description = "Missing or invalid access token")
    ),
    tag = "session"
)]
pub async fn logout_all(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    let principal = authenticate(&headers, &state)?;

    let revoked = state
        .tokens()
        .revoke_all_for_user(&principal.username)
        .await
        .map_err(|err| {
            error!("Failed to revoke refresh tokens: {err:#}");
            ApiError::Internal
        })?;
    info!(revoked, "Revoked all refresh tokens for user: {}", principal.username);

    Ok((
        StatusCode::OK,
        clear_session_cookies(state.config()),
        Json(MessageResponse {
            message: "Logged out from all devices successfully".to_string(),
        }),
    )
        .into_response())
}

/// Expire both session cookies, even when the revoke path failed.
pub(super) fn clear_session_cookies(config: &AuthConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = clear_access_cookie(config) {
        headers.append(SET_COOKIE, cookie);
    }
    if let Ok(cookie) = clear_refresh_cookie(config) {
        headers.append(SET_COOKIE, cookie);
    }
    headers
}
