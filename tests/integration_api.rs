//! End-to-end tests for the session surface, driven through the full router
//! against the file backend in a temp directory.

use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use sesio::{
    api::{
        self, AuthConfig, AuthState, FailedLoginLimiter, NoopRateLimiter, RateLimiter,
        LOGIN_ATTEMPT_LIMIT, LOGIN_ATTEMPT_WINDOW,
    },
    store::{file::FileStore, hash_password, CredentialStore, NewUser, Role, StorageBackend},
    token::TokenIssuer,
};

struct TestServer {
    app: Router,
    _dir: TempDir,
}

async fn server() -> TestServer {
    server_with(AuthConfig::new("http://localhost:3001".to_string())).await
}

async fn server_with(config: AuthConfig) -> TestServer {
    let dir = TempDir::new().expect("tempdir");
    let store = FileStore::open(dir.path().join("users.json"))
        .await
        .expect("open store");

    // Seed the admin account the way a fresh deployment would.
    store
        .create(NewUser {
            username: "admin".to_string(),
            password_hash: hash_password("admin123").expect("hash"),
            role: Role::Admin,
            email: Some("admin@example.com".to_string()),
            display_name: None,
        })
        .await
        .expect("seed admin");

    let store = Arc::new(store);
    let limiter: Arc<dyn RateLimiter> = Arc::new(FailedLoginLimiter::new(
        LOGIN_ATTEMPT_WINDOW,
        LOGIN_ATTEMPT_LIMIT,
    ));
    let issuer = TokenIssuer::new(
        &SecretString::from("integration-test-secret".to_string()),
        config.access_token_ttl_seconds(),
    );
    let state = Arc::new(AuthState::new(
        config,
        issuer,
        StorageBackend::File,
        store.clone(),
        store,
        limiter,
    ));

    TestServer {
        app: api::app(state).expect("router"),
        _dir: dir,
    }
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, headers, body)
}

fn set_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| {
            let (cookie_name, rest) = cookie.split_once('=')?;
            if cookie_name == name {
                rest.split(';').next().map(str::to_string)
            } else {
                None
            }
        })
}

async fn login(app: &Router, username: &str, password: &str) -> (StatusCode, HeaderMap, Value) {
    send(
        app,
        post_json("/login", &json!({"username": username, "password": password})),
    )
    .await
}

#[tokio::test]
async fn login_returns_tokens_and_cookies_for_seeded_admin() {
    let server = server().await;
    let (status, headers, body) = login(&server.app, "admin", "admin123").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Login successful");
    assert_eq!(body["user"]["username"], "admin");
    assert_eq!(body["user"]["role"], "admin");
    assert_eq!(body["expiresIn"], 3600);
    assert!(body["token"].as_str().is_some_and(|token| !token.is_empty()));

    let access = set_cookie_value(&headers, "token").expect("access cookie");
    assert!(!access.is_empty());
    let refresh = set_cookie_value(&headers, "refreshToken").expect("refresh cookie");
    assert!(!refresh.is_empty());

    // The refresh cookie must stay scoped to the refresh endpoint.
    let refresh_header = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|cookie| cookie.starts_with("refreshToken="))
        .expect("refresh set-cookie");
    assert!(refresh_header.contains("Path=/refresh-token"));
    assert!(refresh_header.contains("HttpOnly"));
    assert!(refresh_header.contains("SameSite=Strict"));
}

#[tokio::test]
async fn login_failures_are_uniform_and_envelope_shaped() {
    let server = server().await;

    let (status, _, wrong_password) = login(&server.app, "admin", "nope").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, unknown_user) = login(&server.app, "ghost", "nope").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // No user-enumeration signal in the body.
    assert_eq!(wrong_password["error"], unknown_user["error"]);
    assert_eq!(wrong_password["error"], "Invalid credentials");
    assert_eq!(wrong_password["status"], 401);
    assert_eq!(wrong_password["path"], "/login");
    assert!(wrong_password["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn login_requires_both_fields() {
    let server = server().await;

    let (status, _, body) = send(
        &server.app,
        post_json("/login", &json!({"username": "admin"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Username and password required");

    let (status, _, _) = login(&server.app, "admin", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sixth_attempt_is_rate_limited_even_with_correct_credentials() {
    let server = server().await;

    for _ in 0..5 {
        let (status, _, _) = send(
            &server.app,
            Request::builder()
                .method("POST")
                .uri("/login")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::from(
                    json!({"username": "admin", "password": "wrong"}).to_string(),
                ))
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, _, body) = send(
        &server.app,
        Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::from(
                json!({"username": "admin", "password": "admin123"}).to_string(),
            ))
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["status"], 429);

    // A different client is unaffected.
    let (status, _, _) = send(
        &server.app,
        Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "203.0.113.10")
            .body(Body::from(
                json!({"username": "admin", "password": "admin123"}).to_string(),
            ))
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn refresh_without_cookie_is_rejected() {
    let server = server().await;

    let (status, _, body) = send(
        &server.app,
        Request::builder()
            .method("POST")
            .uri("/refresh-token")
            .body(Body::empty())
            .expect("request"),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Refresh token required");
    assert_eq!(body["status"], 401);
}

#[tokio::test]
async fn refresh_issues_a_new_access_token() {
    let server = server().await;
    let (_, headers, _) = login(&server.app, "admin", "admin123").await;
    let refresh = set_cookie_value(&headers, "refreshToken").expect("refresh cookie");

    let (status, headers, body) = send(
        &server.app,
        Request::builder()
            .method("POST")
            .uri("/refresh-token")
            .header(header::COOKIE, format!("refreshToken={refresh}"))
            .body(Body::empty())
            .expect("request"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Token refreshed successfully");
    assert_eq!(body["user"]["username"], "admin");
    assert!(body["token"].as_str().is_some());
    // Only the access cookie is refreshed; the refresh token is not rotated.
    assert!(set_cookie_value(&headers, "token").is_some());
    assert!(set_cookie_value(&headers, "refreshToken").is_none());
}

#[tokio::test]
async fn garbage_refresh_token_is_rejected_uniformly() {
    let server = server().await;

    let (status, _, body) = send(
        &server.app,
        Request::builder()
            .method("POST")
            .uri("/refresh-token")
            .header(header::COOKIE, "refreshToken=not-a-real-token")
            .body(Body::empty())
            .expect("request"),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid refresh token");
}

#[tokio::test]
async fn logout_revokes_the_refresh_token_and_is_idempotent() {
    let server = server().await;
    let (_, headers, _) = login(&server.app, "admin", "admin123").await;
    let refresh = set_cookie_value(&headers, "refreshToken").expect("refresh cookie");

    let logout_request = || {
        Request::builder()
            .method("POST")
            .uri("/logout")
            .header(header::COOKIE, format!("refreshToken={refresh}"))
            .body(Body::empty())
            .expect("request")
    };

    let (status, headers, body) = send(&server.app, logout_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logout successful");
    // Both cookies are expired on the way out.
    let cleared: Vec<_> = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    assert!(cleared.iter().any(|c| c.starts_with("token=;")));
    assert!(cleared.iter().any(|c| c.starts_with("refreshToken=;")));

    // Second logout with the same (now revoked) cookie still succeeds.
    let (status, _, _) = send(&server.app, logout_request()).await;
    assert_eq!(status, StatusCode::OK);

    // And logout with no cookie at all succeeds too.
    let (status, _, _) = send(
        &server.app,
        Request::builder()
            .method("POST")
            .uri("/logout")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The revoked token can never mint another access token.
    let (status, _, _) = send(
        &server.app,
        Request::builder()
            .method("POST")
            .uri("/refresh-token")
            .header(header::COOKIE, format!("refreshToken={refresh}"))
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_all_revokes_every_session() {
    let server = server().await;

    // Two independent sessions for the same user.
    let (_, first_headers, first_body) = login(&server.app, "admin", "admin123").await;
    let (_, second_headers, _) = login(&server.app, "admin", "admin123").await;
    let first_refresh = set_cookie_value(&first_headers, "refreshToken").expect("cookie");
    let second_refresh = set_cookie_value(&second_headers, "refreshToken").expect("cookie");
    let access = first_body["token"].as_str().expect("token").to_string();

    let (status, _, _) = send(
        &server.app,
        Request::builder()
            .method("POST")
            .uri("/logout-all")
            .header(header::AUTHORIZATION, format!("Bearer {access}"))
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for refresh in [first_refresh, second_refresh] {
        let (status, _, _) = send(
            &server.app,
            Request::builder()
                .method("POST")
                .uri("/refresh-token")
                .header(header::COOKIE, format!("refreshToken={refresh}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn logout_all_requires_authentication() {
    let server = server().await;

    let (status, _, _) = send(
        &server.app,
        Request::builder()
            .method("POST")
            .uri("/logout-all")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn password_reset_flow_consumes_the_token_once() {
    let server = server().await;

    // Hold a session so we can prove reset revokes it.
    let (_, headers, _) = login(&server.app, "admin", "admin123").await;
    let refresh = set_cookie_value(&headers, "refreshToken").expect("cookie");

    let (status, _, body) = send(
        &server.app,
        post_json("/forgot-password", &json!({"username": "admin"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // Outside production the raw token is returned for testing.
    let reset_token = body["resetToken"].as_str().expect("reset token").to_string();

    let (status, _, body) = send(
        &server.app,
        post_json(
            "/reset-password",
            &json!({"token": reset_token, "newPassword": "brand-new-pass"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Password reset successfully");

    // Old password out, new password in.
    let (status, _, _) = login(&server.app, "admin", "admin123").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _, _) = login(&server.app, "admin", "brand-new-pass").await;
    assert_eq!(status, StatusCode::OK);

    // All pre-reset refresh tokens are revoked.
    let (status, _, _) = send(
        &server.app,
        Request::builder()
            .method("POST")
            .uri("/refresh-token")
            .header(header::COOKIE, format!("refreshToken={refresh}"))
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Second consumption of the same token fails.
    let (status, _, body) = send(
        &server.app,
        post_json(
            "/reset-password",
            &json!({"token": reset_token, "newPassword": "another-pass"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid or expired token");
}

#[tokio::test]
async fn second_reset_token_invalidates_the_first() {
    let server = server().await;

    let (_, _, first) = send(
        &server.app,
        post_json("/forgot-password", &json!({"username": "admin"})),
    )
    .await;
    let (_, _, second) = send(
        &server.app,
        post_json("/forgot-password", &json!({"email": "admin@example.com"})),
    )
    .await;

    let first_token = first["resetToken"].as_str().expect("token");
    let second_token = second["resetToken"].as_str().expect("token");

    let (status, _, _) = send(
        &server.app,
        post_json(
            "/reset-password",
            &json!({"token": first_token, "newPassword": "irrelevant"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(
        &server.app,
        post_json(
            "/reset-password",
            &json!({"token": second_token, "newPassword": "new-pass-123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn forgot_password_does_not_reveal_unknown_accounts() {
    let server = server().await;

    let (status, _, body) = send(
        &server.app,
        post_json("/forgot-password", &json!({"username": "ghost"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["resetToken"].as_str().is_none());
    assert_eq!(
        body["message"],
        "If that account exists, a password reset link has been sent"
    );

    let (status, _, _) = send(&server.app, post_json("/forgot-password", &json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn production_mode_never_returns_the_reset_token() {
    let config = AuthConfig::new("http://localhost:3001".to_string()).with_production(true);
    let server = server_with(config).await;

    let (status, _, body) = send(
        &server.app,
        post_json("/forgot-password", &json!({"username": "admin"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("resetToken").is_none());
}

#[tokio::test]
async fn change_password_requires_the_current_password() {
    let server = server().await;
    let (_, _, body) = login(&server.app, "admin", "admin123").await;
    let access = body["token"].as_str().expect("token").to_string();

    let (status, _, body) = send(
        &server.app,
        Request::builder()
            .method("PUT")
            .uri("/password")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {access}"))
            .body(Body::from(
                json!({"currentPassword": "wrong", "newPassword": "next-pass"}).to_string(),
            ))
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Current password is incorrect");

    let (status, _, _) = send(
        &server.app,
        Request::builder()
            .method("PUT")
            .uri("/password")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {access}"))
            .body(Body::from(
                json!({"currentPassword": "admin123", "newPassword": "next-pass"}).to_string(),
            ))
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = login(&server.app, "admin", "next-pass").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn refresh_tokens_can_be_disabled() {
    let config =
        AuthConfig::new("http://localhost:3001".to_string()).with_refresh_tokens_enabled(false);
    let server = server_with(config).await;

    let (status, headers, body) = login(&server.app, "admin", "admin123").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].as_str().is_some());
    assert!(set_cookie_value(&headers, "token").is_some());
    assert!(set_cookie_value(&headers, "refreshToken").is_none());
}

#[tokio::test]
async fn admin_can_manage_users_and_deletion_cascades() {
    let server = server().await;
    let (_, _, body) = login(&server.app, "admin", "admin123").await;
    let admin_token = body["token"].as_str().expect("token").to_string();

    // Create a regular user.
    let (status, _, body) = send(
        &server.app,
        Request::builder()
            .method("POST")
            .uri("/users")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {admin_token}"))
            .body(Body::from(
                json!({"username": "Alice", "password": "wonder-land"}).to_string(),
            ))
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    // Usernames are normalized to lowercase.
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["role"], "user");

    // Duplicate username conflicts.
    let (status, _, _) = send(
        &server.app,
        Request::builder()
            .method("POST")
            .uri("/users")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {admin_token}"))
            .body(Body::from(
                json!({"username": "alice", "password": "other"}).to_string(),
            ))
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // The new user can log in and see their profile.
    let (_, alice_headers, alice_body) = login(&server.app, "alice", "wonder-land").await;
    let alice_refresh = set_cookie_value(&alice_headers, "refreshToken").expect("cookie");
    let alice_token = alice_body["token"].as_str().expect("token").to_string();

    let (status, _, body) = send(
        &server.app,
        Request::builder()
            .method("GET")
            .uri("/me")
            .header(header::AUTHORIZATION, format!("Bearer {alice_token}"))
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert!(body.get("passwordHash").is_none());

    // Non-admins cannot list users.
    let (status, _, _) = send(
        &server.app,
        Request::builder()
            .method("GET")
            .uri("/users")
            .header(header::AUTHORIZATION, format!("Bearer {alice_token}"))
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Admin sees both accounts.
    let (status, _, body) = send(
        &server.app,
        Request::builder()
            .method("GET")
            .uri("/users")
            .header(header::AUTHORIZATION, format!("Bearer {admin_token}"))
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["users"].as_array().expect("users").len(), 2);

    // Deleting the account also revokes its refresh tokens.
    let (status, _, _) = send(
        &server.app,
        Request::builder()
            .method("DELETE")
            .uri("/users/alice")
            .header(header::AUTHORIZATION, format!("Bearer {admin_token}"))
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(
        &server.app,
        Request::builder()
            .method("POST")
            .uri("/refresh-token")
            .header(header::COOKIE, format!("refreshToken={alice_refresh}"))
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(
        &server.app,
        Request::builder()
            .method("DELETE")
            .uri("/users/alice")
            .header(header::AUTHORIZATION, format!("Bearer {admin_token}"))
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_routes_get_the_error_envelope() {
    let server = server().await;

    let (status, _, body) = send(
        &server.app,
        Request::builder()
            .method("GET")
            .uri("/no-such-route")
            .body(Body::empty())
            .expect("request"),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);
    assert_eq!(body["path"], "/no-such-route");
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn health_reports_service_metadata() {
    let server = server().await;

    let (status, headers, body) = send(
        &server.app,
        Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .expect("request"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "sesio");
    assert!(headers.get("X-App").is_some());
}

#[tokio::test]
async fn noop_limiter_disables_lockout() {
    // Mirrors ENABLE_ACCOUNT_LOCKOUT=false.
    let dir = TempDir::new().expect("tempdir");
    let store = FileStore::open(dir.path().join("users.json"))
        .await
        .expect("open store");
    store
        .create(NewUser {
            username: "admin".to_string(),
            password_hash: hash_password("admin123").expect("hash"),
            role: Role::Admin,
            email: None,
            display_name: None,
        })
        .await
        .expect("seed admin");
    let store = Arc::new(store);
    let state = Arc::new(AuthState::new(
        AuthConfig::new("http://localhost:3001".to_string()),
        TokenIssuer::new(&SecretString::from("secret".to_string()), 3600),
        StorageBackend::File,
        store.clone(),
        store,
        Arc::new(NoopRateLimiter),
    ));
    let app = api::app(state).expect("router");

    for _ in 0..6 {
        let (status, _, _) = send(
            &app,
            post_json("/login", &json!({"username": "admin", "password": "wrong"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, _, _) = send(
        &app,
        post_json("/login", &json!({"username": "admin", "password": "admin123"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
