//! User management endpoints (admin) and the caller's own profile.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use tracing::{error, info};

use super::auth::{
    principal::{authenticate, require_admin},
    types::{
        CreateUserRequest, CreateUserResponse, MessageResponse, ProfileResponse, UserSummary,
        UsersResponse,
    },
    utils::valid_email,
    AuthState,
};
use crate::{
    api::error::ApiError,
    store::{hash_password, CreateOutcome, NewUser, Role},
};

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Caller profile", body = ProfileResponse),
        (status = 401, description = "Missing or invalid access token"),
        (status = 404, description = "Account no longer exists")
    ),
    tag = "users"
)]
pub async fn me(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let principal = authenticate(&headers, &state)?;

    let user = state
        .credentials()
        .find_by_username(&principal.username)
        .await
        .map_err(|err| {
            error!("Credential lookup failed: {err:#}");
            ApiError::Internal
        })?
        .ok_or(ApiError::NotFound("User not found"))?;

    Ok(Json(ProfileResponse::from(&user)))
}

#[utoipa::path(
    get,
    path = "/users",
    responses(
        (status = 200, description = "All accounts", body = UsersResponse),
        (status = 401, description = "Missing or invalid access token"),
        (status = 403, description = "Caller is not an admin")
    ),
    tag = "users"
)]
pub async fn list_users(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<Json<UsersResponse>, ApiError> {
    let principal = authenticate(&headers, &state)?;
    require_admin(&principal)?;

    let users = state.credentials().list().await.map_err(|err| {
        error!("Failed to list users: {err:#}");
        ApiError::Internal
    })?;

    Ok(Json(UsersResponse {
        users: users.iter().map(UserSummary::from).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Account created", body = CreateUserResponse),
        (status = 400, description = "Missing or invalid fields"),
        (status = 403, description = "Caller is not an admin"),
        (status = 409, description = "Username already exists")
    ),
    tag = "users"
)]
pub async fn create_user(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Option<Json<CreateUserRequest>>,
) -> Result<(StatusCode, Json<CreateUserResponse>), ApiError> {
    let principal = authenticate(&headers, &state)?;
    require_admin(&principal)?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation(
            "Username and password required".to_string(),
        ));
    };
    let username = request.username.trim().to_lowercase();
    if username.is_empty() || request.password.is_empty() {
        return Err(ApiError::Validation(
            "Username and password required".to_string(),
        ));
    }
    let email = match request.email.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(email) => {
            let email = email.to_lowercase();
            if !valid_email(&email) {
                return Err(ApiError::Validation("Invalid email".to_string()));
            }
            Some(email)
        }
    };

    let password_hash = hash_password(&request.password).map_err(|err| {
        error!("Failed to hash password: {err:#}");
        ApiError::Internal
    })?;

    let outcome = state
        .credentials()
        .create(NewUser {
            username,
            password_hash,
            role: request.role.unwrap_or(Role::User),
            email,
            display_name: request.display_name,
        })
        .await
        .map_err(|err| {
            error!("Failed to create user: {err:#}");
            ApiError::Internal
        })?;

    match outcome {
        CreateOutcome::Created(user) => {
            info!("User created: {}", user.username);
            Ok((
                StatusCode::CREATED,
                Json(CreateUserResponse {
                    message: "User created successfully".to_string(),
                    user: UserSummary::from(&user),
                }),
            ))
        }
        CreateOutcome::Conflict => Err(ApiError::Conflict("Username already exists")),
    }
}

#[utoipa::path(
    delete,
    path = "/users/{username}",
    params(
        ("username" = String, Path, description = "Account to delete")
    ),
    responses(
        (status = 200, description = "Account deleted and its tokens revoked",
            body = MessageResponse),
        (status = 403, description = "Caller is not an admin"),
        (status = 404, description = "No such account")
    ),
    tag = "users"
)]
pub async fn delete_user(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
    Path(username): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let principal = authenticate(&headers, &state)?;
    require_admin(&principal)?;

    let deleted = state.credentials().delete(&username).await.map_err(|err| {
        error!("Failed to delete user: {err:#}");
        ApiError::Internal
    })?;
    if !deleted {
        return Err(ApiError::NotFound("User not found"));
    }

    // Deleting an account cascade-revokes its refresh tokens so nothing can
    // be exchanged for a new access token afterwards.
    let revoked = state
        .tokens()
        .revoke_all_for_user(&username)
        .await
        .map_err(|err| {
            error!("Failed to revoke refresh tokens: {err:#}");
            ApiError::Internal
        })?;
    info!(revoked, "User deleted: {username}");

    Ok(Json(MessageResponse {
        message: "User deleted successfully".to_string(),
    }))
}
