//! Cookie and client-identity helpers for the session endpoints.

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};
use regex::Regex;

use super::state::AuthConfig;

pub(crate) const ACCESS_COOKIE_NAME: &str = "token";
pub(crate) const REFRESH_COOKIE_NAME: &str = "refreshToken";
/// The refresh cookie is only ever sent to the refresh endpoint.
pub(crate) const REFRESH_COOKIE_PATH: &str = "/refresh-token";

/// Usernames are stored lowercase; normalize before any lookup.
pub(super) fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

pub(super) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Pull a named cookie out of the request headers.
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name {
            return Some(val.to_string());
        }
    }
    None
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn build_cookie(
    name: &str,
    value: &str,
    path: &str,
    max_age: u64,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{name}={value}; Path={path}; HttpOnly; SameSite=Strict; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// The short-lived access-token cookie.
pub(super) fn access_cookie(
    config: &AuthConfig,
    token: &str,
    max_age: u64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(ACCESS_COOKIE_NAME, token, "/", max_age, config.cookie_secure())
}

pub(super) fn clear_access_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(ACCESS_COOKIE_NAME, "", "/", 0, config.cookie_secure())
}

/// The long-lived refresh-token cookie, path-restricted to `/refresh-token`.
pub(super) fn refresh_cookie(
    config: &AuthConfig,
    token: &str,
    max_age: u64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(
        REFRESH_COOKIE_NAME,
        token,
        REFRESH_COOKIE_PATH,
        max_age,
        config.cookie_secure(),
    )
}

pub(super) fn clear_refresh_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(
        REFRESH_COOKIE_NAME,
        "",
        REFRESH_COOKIE_PATH,
        0,
        config.cookie_secure(),
    )
}

/// Client key for rate limiting, taken from the usual proxy headers.
pub(super) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return Some(forwarded.to_string());
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    fn config() -> AuthConfig {
        AuthConfig::new("http://localhost:3001".to_string())
    }

    #[test]
    fn normalize_username_trims_and_lowercases() {
        assert_eq!(normalize_username(" Admin "), "admin");
    }

    #[test]
    fn valid_email_accepts_and_rejects() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn cookie_value_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("token=abc; refreshToken=def"),
        );
        assert_eq!(cookie_value(&headers, "token"), Some("abc".to_string()));
        assert_eq!(
            cookie_value(&headers, REFRESH_COOKIE_NAME),
            Some("def".to_string())
        );
        assert_eq!(cookie_value(&headers, "other"), None);
    }

    #[test]
    fn bearer_token_requires_non_empty_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc123"),
        );
        assert_eq!(bearer_token(&headers), Some("abc123".to_string()));

        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer "),
        );
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn access_cookie_shape() {
        let cookie = access_cookie(&config(), "abc", 3600).expect("cookie");
        let value = cookie.to_str().expect("ascii");
        assert!(value.starts_with("token=abc;"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Strict"));
        assert!(value.contains("Max-Age=3600"));
        assert!(!value.contains("Secure"));
    }

    #[test]
    fn refresh_cookie_is_path_restricted() {
        let cookie = refresh_cookie(&config(), "abc", 604_800).expect("cookie");
        let value = cookie.to_str().expect("ascii");
        assert!(value.contains("Path=/refresh-token"));
    }

    #[test]
    fn production_cookies_are_secure() {
        let config = config().with_production(true);
        let cookie = access_cookie(&config, "abc", 3600).expect("cookie");
        assert!(cookie.to_str().expect("ascii").ends_with("; Secure"));

        let cleared = clear_access_cookie(&config).expect("cookie");
        assert!(cleared.to_str().expect("ascii").contains("Max-Age=0"));
        let cleared = clear_refresh_cookie(&config).expect("cookie");
        assert!(cleared.to_str().expect("ascii").contains("Max-Age=0"));
    }

    #[test]
    fn client_ip_prefers_forwarded_then_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));

        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }
}
