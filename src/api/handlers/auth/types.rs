//! Request/response types for the session and password endpoints.
//!
//! The wire format is camelCase (`expiresIn`, `newPassword`, ...), which is
//! what the dashboard clients already speak.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::store::{Role, User};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Public view of an account inside session responses.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionUser {
    pub username: String,
    pub role: Role,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            role: user.role,
        }
    }
}

/// Body returned by both `/login` and `/refresh-token`. The token is also
/// set as a cookie; it is repeated here for non-cookie clients.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub message: String,
    pub user: SessionUser,
    pub token: String,
    pub expires_in: u64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct ForgotPasswordRequest {
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordResponse {
    pub message: String,
    /// Only present outside production so the flow can be exercised without
    /// an email channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role: Option<Role>,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            role: user.role,
            created_at: user.created_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UsersResponse {
    pub users: Vec<UserSummary>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateUserResponse {
    pub message: String,
    pub user: UserSummary,
}

/// The caller's own profile; the password hash never appears here.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub username: String,
    pub role: Role,
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[schema(value_type = Object)]
    pub preferences: serde_json::Value,
}

impl From<&User> for ProfileResponse {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            role: user.role,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            preferences: user.preferences.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ForgotPasswordResponse, ResetPasswordRequest, SessionResponse, SessionUser};
    use crate::store::Role;

    #[test]
    fn session_response_uses_camel_case() {
        let response = SessionResponse {
            message: "Login successful".to_string(),
            user: SessionUser {
                username: "admin".to_string(),
                role: Role::Admin,
            },
            token: "jwt".to_string(),
            expires_in: 3600,
        };
        let value = serde_json::to_value(&response).expect("serialize");
        assert_eq!(value["expiresIn"], 3600);
        assert_eq!(value["user"]["role"], "admin");
    }

    #[test]
    fn reset_request_reads_camel_case() {
        let request: ResetPasswordRequest =
            serde_json::from_str(r#"{"token":"t","newPassword":"p"}"#).expect("deserialize");
        assert_eq!(request.token, "t");
        assert_eq!(request.new_password, "p");
    }

    #[test]
    fn reset_token_is_omitted_when_absent() {
        let response = ForgotPasswordResponse {
            message: "ok".to_string(),
            reset_token: None,
        };
        let value = serde_json::to_value(&response).expect("serialize");
        assert!(value.get("resetToken").is_none());
    }
}
