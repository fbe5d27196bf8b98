//! Password reset and change endpoints.

use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{
    principal::authenticate,
    state::AuthState,
    types::{
        ChangePasswordRequest, ForgotPasswordRequest, ForgotPasswordResponse, MessageResponse,
        ResetPasswordRequest,
    },
    utils::{normalize_email, normalize_username},
};
use crate::{api::error::ApiError, store::hash_password, store::User};

const FORGOT_PASSWORD_MESSAGE: &str = "If that account exists, a password reset link has been sent";

#[utoipa::path(
    post,
    path = "/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Uniform acknowledgement; no account enumeration",
            body = ForgotPasswordResponse),
        (status = 400, description = "Neither username nor email supplied")
    ),
    tag = "password"
)]
pub async fn forgot_password(
    Extension(state): Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<Json<ForgotPasswordResponse>, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    if request.username.is_none() && request.email.is_none() {
        return Err(ApiError::Validation(
            "Username or email required".to_string(),
        ));
    }

    let user = lookup_account(&state, &request).await?;

    // Unknown accounts get the same acknowledgement as known ones.
    let Some(user) = user else {
        return Ok(Json(ForgotPasswordResponse {
            message: FORGOT_PASSWORD_MESSAGE.to_string(),
            reset_token: None,
        }));
    };

    let issued = state
        .tokens()
        .create_reset_token(&user.username, state.config().reset_token_ttl_minutes())
        .await
        .map_err(|err| {
            error!("Failed to create reset token: {err:#}");
            ApiError::Internal
        })?;

    info!("Generated password reset token for user: {}", user.username);

    // Outside production the raw token is echoed back so the flow can be
    // exercised without an email channel.
    let reset_token = (!state.config().production()).then_some(issued.token);

    Ok(Json(ForgotPasswordResponse {
        message: FORGOT_PASSWORD_MESSAGE.to_string(),
        reset_token,
    }))
}

async fn lookup_account(
    state: &AuthState,
    request: &ForgotPasswordRequest,
) -> Result<Option<User>, ApiError> {
    let lookup = match (&request.username, &request.email) {
        (Some(username), _) => {
            state
                .credentials()
                .find_by_username(&normalize_username(username))
                .await
        }
        (None, Some(email)) => state.credentials().find_by_email(&normalize_email(email)).await,
        (None, None) => return Ok(None),
    };
    lookup.map_err(|err| {
        error!("Account lookup failed: {err:#}");
        ApiError::Internal
    })
}

#[utoipa::path(
    post,
    path = "/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password replaced; all refresh tokens revoked",
            body = MessageResponse),
        (status = 400, description = "Missing fields or invalid/expired token")
    ),
    tag = "password"
)]
pub async fn reset_password(
    Extension(state): Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation(
            "Token and new password required".to_string(),
        ));
    };
    if request.token.is_empty() || request.new_password.is_empty() {
        return Err(ApiError::Validation(
            "Token and new password required".to_string(),
        ));
    }

    let username = state
        .tokens()
        .consume_reset_token(&request.token)
        .await
        .map_err(|err| {
            error!("Failed to consume reset token: {err:#}");
            ApiError::Internal
        })?;
    let Some(username) = username else {
        return Err(ApiError::Validation("Invalid or expired token".to_string()));
    };

    apply_new_password(&state, &username, &request.new_password).await?;

    Ok(Json(MessageResponse {
        message: "Password reset successfully".to_string(),
    }))
}

#[utoipa::path(
    put,
    path = "/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed; other sessions revoked",
            body = MessageResponse),
        (status = 400, description = "Missing fields"),
        (status = 401, description = "Not authenticated or current password wrong")
    ),
    tag = "password"
)]
pub async fn change_password(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let principal = authenticate(&headers, &state)?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation(
            "Current and new passwords required".to_string(),
        ));
    };
    if request.current_password.is_empty() || request.new_password.is_empty() {
        return Err(ApiError::Validation(
            "Current and new passwords required".to_string(),
        ));
    }

    let user = state
        .credentials()
        .find_by_username(&principal.username)
        .await
        .map_err(|err| {
            error!("Credential lookup failed: {err:#}");
            ApiError::Internal
        })?
        .ok_or(ApiError::NotFound("User not found"))?;

    if !user.verify_password(&request.current_password) {
        warn!("Current password mismatch for user: {}", user.username);
        return Err(ApiError::CurrentPasswordMismatch);
    }

    apply_new_password(&state, &user.username, &request.new_password).await?;

    Ok(Json(MessageResponse {
        message: "Password changed successfully".to_string(),
    }))
}

/// Store the new hash, then revoke every refresh token so other devices must
/// sign in again.
async fn apply_new_password(
    state: &AuthState,
    username: &str,
    new_password: &str,
) -> Result<(), ApiError> {
    let password_hash = hash_password(new_password).map_err(|err| {
        error!("Failed to hash password: {err:#}");
        ApiError::Internal
    })?;

    let updated = state
        .credentials()
        .set_password(username, &password_hash)
        .await
        .map_err(|err| {
            error!("Failed to update password: {err:#}");
            ApiError::Internal
        })?;
    if !updated {
        return Err(ApiError::NotFound("User not found"));
    }

    let revoked = state
        .tokens()
        .revoke_all_for_user(username)
        .await
        .map_err(|err| {
            error!("Failed to revoke refresh tokens: {err:#}");
            ApiError::Internal
        })?;
    info!(revoked, "Password updated for user: {username}");
    Ok(())
}
