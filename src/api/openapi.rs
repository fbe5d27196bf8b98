use utoipa::openapi::{InfoBuilder, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

use super::handlers::{
    auth::{login, password, session},
    health, users,
};

/// The generated `OpenAPI` document for the served routes.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Register new endpoints here via `.routes(routes!(...))` so they are both
/// served and documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut session_tag = Tag::new("session");
    session_tag.description = Some("Login, refresh, and logout".to_string());

    let mut password_tag = Tag::new("password");
    password_tag.description = Some("Password reset and change".to_string());

    let mut users_tag = Tag::new("users");
    users_tag.description = Some("Profiles and admin user management".to_string());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Service metadata".to_string());

    let mut openapi = cargo_openapi();
    openapi.tags = Some(vec![session_tag, password_tag, users_tag, health_tag]);

    OpenApiRouter::with_openapi(openapi)
        .routes(routes!(health::health))
        .routes(routes!(login::login))
        .routes(routes!(session::refresh_token))
        .routes(routes!(session::logout))
        .routes(routes!(session::logout_all))
        .routes(routes!(password::forgot_password))
        .routes(routes!(password::reset_password))
        .routes(routes!(password::change_password))
        .routes(routes!(users::me))
        .routes(routes!(users::list_users, users::create_user))
        .routes(routes!(users::delete_user))
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(Some(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    OpenApiBuilder::new().info(info).build()
}
