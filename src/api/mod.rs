//! HTTP surface: router assembly, middleware layers, and the server loop.

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::{Extension, MatchedPath, Request},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

pub mod error;
pub(crate) mod handlers;
mod openapi;

pub use error::ApiError;
pub use handlers::auth::{
    AuthConfig, AuthState, FailedLoginLimiter, NoopRateLimiter, RateLimiter, LOGIN_ATTEMPT_LIMIT,
    LOGIN_ATTEMPT_WINDOW,
};
pub use openapi::openapi;

/// Build the application router with every layer attached.
///
/// # Errors
///
/// Returns an error when the configured frontend origin is not a valid URL.
pub fn app(state: Arc<AuthState>) -> Result<Router> {
    let cors = cors_layer(state.config().frontend_origin())?;

    let (router, _openapi) = openapi::api_router().split_for_parts();
    Ok(router
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &Request<Body>| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(axum::middleware::from_fn(error::error_envelope))
                .layer(Extension(state)),
        ))
}

/// Start the server.
///
/// # Errors
///
/// Returns an error if the router cannot be built or the listener fails.
pub async fn new(port: u16, state: Arc<AuthState>) -> Result<()> {
    let app = app(state)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Not found")
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn cors_layer(frontend_origin: &str) -> Result<CorsLayer> {
    let origin = parse_origin(frontend_origin)?;
    Ok(CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(AllowOrigin::exact(origin))
        .allow_credentials(true))
}

fn parse_origin(frontend_origin: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_origin)
        .with_context(|| format!("Invalid frontend origin: {frontend_origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Frontend origin must include a valid host: {frontend_origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::parse_origin;

    #[test]
    fn parse_origin_strips_paths_and_keeps_ports() {
        let origin = parse_origin("http://localhost:3001/dashboard").expect("origin");
        assert_eq!(origin, "http://localhost:3001");

        let origin = parse_origin("https://app.example.com").expect("origin");
        assert_eq!(origin, "https://app.example.com");
    }

    #[test]
    fn parse_origin_rejects_garbage() {
        assert!(parse_origin("not a url").is_err());
    }
}
