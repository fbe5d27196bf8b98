//! Access-token authentication for protected endpoints.

use axum::http::HeaderMap;
use tracing::debug;

use super::{
    state::AuthState,
    utils::{bearer_token, cookie_value, ACCESS_COOKIE_NAME},
};
use crate::{api::error::ApiError, store::Role, token::AccessClaims};

/// The authenticated caller, as proven by a valid access token.
#[derive(Clone, Debug)]
pub(crate) struct Principal {
    pub(crate) username: String,
    pub(crate) role: Role,
}

impl From<AccessClaims> for Principal {
    fn from(claims: AccessClaims) -> Self {
        Self {
            username: claims.sub,
            role: claims.role,
        }
    }
}

/// Resolve the access token from the `token` cookie or a bearer header.
/// Validity is purely the signature and expiry; no store access happens.
pub(crate) fn authenticate(headers: &HeaderMap, state: &AuthState) -> Result<Principal, ApiError> {
    let token = cookie_value(headers, ACCESS_COOKIE_NAME)
        .or_else(|| bearer_token(headers))
        .ok_or(ApiError::AuthRequired("Authentication required"))?;

    let claims = state.issuer().verify_access_token(&token).map_err(|err| {
        debug!("Access token rejected: {err:#}");
        ApiError::InvalidToken("Invalid or expired token")
    })?;

    Ok(Principal::from(claims))
}

pub(crate) fn require_admin(principal: &Principal) -> Result<(), ApiError> {
    if principal.role == Role::Admin {
        Ok(())
    } else {
        Err(ApiError::PermissionDenied)
    }
}
