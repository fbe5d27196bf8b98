//! Login endpoint.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{
    rate_limit::RateLimitDecision,
    state::AuthState,
    types::{LoginRequest, SessionResponse, SessionUser},
    utils::{access_cookie, extract_client_ip, normalize_username, refresh_cookie},
};
use crate::api::error::ApiError;

#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = SessionResponse),
        (status = 400, description = "Missing username or password"),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Too many failed attempts")
    ),
    tag = "session"
)]
pub async fn login(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation(
            "Username and password required".to_string(),
        ));
    };
    if request.username.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::Validation(
            "Username and password required".to_string(),
        ));
    }

    let username = normalize_username(&request.username);
    let client = extract_client_ip(&headers).unwrap_or_else(|| "unknown".to_string());

    // Lockout is checked before the credentials: a correct password does not
    // bypass an active window.
    if state.rate_limiter().check(&client) == RateLimitDecision::Limited {
        warn!("Rate limited login for client: {client}");
        return Err(ApiError::RateLimited);
    }

    let user = state
        .credentials()
        .find_by_username(&username)
        .await
        .map_err(|err| {
            error!("Credential lookup failed: {err:#}");
            ApiError::Internal
        })?;

    // The response is identical for both failure cases; only the logs say
    // which one it was.
    let Some(user) = user else {
        warn!("Login attempt for non-existent user: {username}");
        state.rate_limiter().record_failure(&client);
        return Err(ApiError::InvalidCredentials);
    };
    if !user.verify_password(&request.password) {
        warn!("Password mismatch for user: {username}");
        state.rate_limiter().record_failure(&client);
        return Err(ApiError::InvalidCredentials);
    }

    info!("Successful login for user: {username}");

    let access = state.issuer().issue_access_token(&user).map_err(|err| {
        error!("Failed to issue access token: {err:#}");
        ApiError::Internal
    })?;

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = access_cookie(state.config(), &access.token, access.expires_in) {
        response_headers.append(SET_COOKIE, cookie);
    }

    if state.config().refresh_tokens_enabled() {
        let refresh = state
            .tokens()
            .create_refresh_token(&user.username, state.config().refresh_token_ttl_days())
            .await
            .map_err(|err| {
                error!("Failed to create refresh token: {err:#}");
                ApiError::Internal
            })?;
        let max_age = u64::try_from(state.config().refresh_token_ttl_days())
            .unwrap_or(0)
            .saturating_mul(24 * 60 * 60);
        if let Ok(cookie) = refresh_cookie(state.config(), &refresh.token, max_age) {
            response_headers.append(SET_COOKIE, cookie);
        }
    }

    let body = SessionResponse {
        message: "Login successful".to_string(),
        user: SessionUser::from(&user),
        token: access.token,
        expires_in: access.expires_in,
    };
    Ok((StatusCode::OK, response_headers, Json(body)).into_response())
}
