//! Password authentication for protected shares
//!
//! The relay is the authentication authority: it holds the argon2 hash taken
//! at registration and never hands it out. A successful login issues an
//! opaque session-scoped cookie token; requests present the cookie and the
//! session validates the token. Failed attempts are rate limited per session.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::relay::pages;
use crate::relay::session::{AuthThrottle, Session};

/// Characters escaped when a path is embedded as a query parameter value
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'=')
    .add(b'?')
    .add(b'\'');

/// Characters escaped when a path is used in a `Location` header
const PATH_VALUE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`');

/// Auth flow path segment under `/{sid}/`
pub(crate) const AUTH_PATH: &str = "__auth__";

/// Cookie name for a session: `fwdcast_auth_{sid}`
pub(crate) fn cookie_name(session_id: &str) -> String {
    format!("fwdcast_auth_{session_id}")
}

/// Hash a share password with argon2id on the blocking pool
pub(crate) async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| Error::auth(format!("failed to hash password: {e}")))
    })
    .await
    .map_err(|e| Error::auth(format!("hash task failed: {e}")))?
}

/// Verify a submitted password against a stored argon2 hash
pub(crate) async fn verify_password(password: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || {
        let Ok(parsed) = PasswordHash::new(&hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
    .await
    .unwrap_or(false)
}

/// Decode one percent-encoded form/query component (`+` means space)
fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}

/// Parse `application/x-www-form-urlencoded` bytes into a field map
pub(crate) fn parse_form(body: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(body);
    parse_pairs(&text)
}

/// Extract one query parameter from a raw query string
pub(crate) fn query_param(query: &str, key: &str) -> Option<String> {
    parse_pairs(query).remove(key)
}

fn parse_pairs(text: &str) -> HashMap<String, String> {
    text.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (decode_component(key), decode_component(value)),
            None => (decode_component(pair), String::new()),
        })
        .collect()
}

/// Percent-encode a path for use as a query parameter value
pub(crate) fn encode_query_value(path: &str) -> String {
    utf8_percent_encode(path, QUERY_VALUE).to_string()
}

/// Percent-encode a path for use in a `Location` header
fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_VALUE).to_string()
}

/// Read a named cookie out of the request headers
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header_value in headers.get_all(header::COOKIE) {
        let Ok(text) = header_value.to_str() else {
            continue;
        };
        for pair in text.split(';') {
            if let Some((key, value)) = pair.trim().split_once('=') {
                if key == name {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Whether the request carries a valid auth cookie for this session
pub(crate) fn cookie_authorized(headers: &HeaderMap, session: &Session) -> bool {
    match cookie_value(headers, &cookie_name(&session.id)) {
        Some(token) => session.check_auth_token(&token),
        None => false,
    }
}

/// Build the `Set-Cookie` value for a freshly issued auth token
pub(crate) fn build_auth_cookie(session_id: &str, token: &str) -> String {
    format!(
        "{}={token}; Path=/{session_id}; Max-Age=3600; HttpOnly; Secure; SameSite=Lax",
        cookie_name(session_id)
    )
}

/// 302 redirect from an unauthenticated viewer to the login page
pub(crate) fn redirect_to_login(session_id: &str, resource_path: &str) -> Response {
    let target = format!("/{session_id}{resource_path}");
    let location = format!(
        "/{session_id}/{AUTH_PATH}?redirect={}",
        encode_query_value(&target)
    );
    found(&location)
}

fn found(location: &str) -> Response {
    let value =
        HeaderValue::from_str(location).unwrap_or_else(|_| HeaderValue::from_static("/"));
    (StatusCode::FOUND, [(header::LOCATION, value)]).into_response()
}

/// Handle `GET`/`POST /{sid}/__auth__`.
///
/// Only reached for protected shares; `password_hash` is the session's
/// stored hash, already extracted by the caller.
pub(crate) async fn handle_auth(
    config: &RelayConfig,
    session: Arc<Session>,
    password_hash: String,
    method: &Method,
    query: Option<&str>,
    body: Bytes,
) -> Response {
    let session_id = session.id.clone();
    let auth_path = format!("/{session_id}/{AUTH_PATH}");

    // Sanitize the post-login destination: default to the share root and
    // never leave this session's prefix.
    let mut redirect = query
        .and_then(|q| query_param(q, "redirect"))
        .unwrap_or_default();
    if redirect.is_empty()
        || redirect.starts_with(&auth_path)
        || !redirect.starts_with(&format!("/{session_id}"))
    {
        redirect = format!("/{session_id}/");
    }
    let encoded_redirect = encode_query_value(&redirect);

    if *method == Method::GET {
        return pages::login(&session_id, &encoded_redirect, false);
    }
    if *method != Method::POST {
        return pages::not_found("Invalid URL");
    }

    let password = parse_form(&body).remove("password").unwrap_or_default();

    match session.check_auth_throttle(config.auth_rate_window, config.auth_max_failures) {
        AuthThrottle::Limited { retry_in } => {
            tracing::debug!(session_id = %session_id, "auth attempt rate limited");
            return pages::rate_limited(&session_id, &encoded_redirect, retry_in.as_secs().max(1));
        }
        AuthThrottle::Allowed => {}
    }

    if verify_password(password, password_hash).await {
        session.reset_auth_failures();
        let token = session.issue_auth_token();
        let cookie = build_auth_cookie(&session_id, &token);

        let mut response = found(&encode_path(&redirect));
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
        tracing::debug!(session_id = %session_id, "viewer authenticated");
        response
    } else {
        session.record_auth_failure();
        tracing::debug!(
            session_id = %session_id,
            failures = session.failed_auth_count(),
            "wrong password"
        );
        pages::login(&session_id, &encoded_redirect, true)
    }
}
