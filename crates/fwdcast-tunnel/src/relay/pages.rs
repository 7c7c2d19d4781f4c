//! Viewer-facing HTML pages served by the relay
//!
//! Error pages, the password prompt, and the rate-limit countdown. Everything
//! interpolated into a template goes through [`escape`] first.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// `Retry-After` value sent with viewer-cap responses, in seconds
pub const RETRY_AFTER_SECS: u32 = 30;

const PAGE_STYLE: &str = "\
    body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; \
text-align: center; padding: 50px 20px; background: #1e1e1e; margin: 0; } \
    .container { max-width: 480px; margin: 0 auto; background: #2d2d2d; padding: 40px; \
border-radius: 8px; box-shadow: 0 4px 20px rgba(0,0,0,0.3); } \
    h1 { color: #cccccc; margin: 0 0 16px 0; font-size: 24px; font-weight: 500; } \
    p { color: #aaaaaa; line-height: 1.6; } \
    .hint { color: #858585; font-size: 14px; margin-top: 20px; }";

/// Escape text for interpolation into HTML
#[must_use]
pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn html_response(status: StatusCode, body: String) -> Response {
    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}

fn simple_page(status: StatusCode, title: &str, message: &str, hint: &str) -> Response {
    let body = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n  <title>{title} - fwdcast</title>\n  \
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n  \
<style>{PAGE_STYLE}</style>\n</head>\n<body>\n  <div class=\"container\">\n    \
<h1>{title}</h1>\n    <p>{}</p>\n    <p class=\"hint\">{hint}</p>\n  </div>\n</body>\n</html>",
        escape(message)
    );
    html_response(status, body)
}

/// 404 page: unknown, expired, or invalid session
pub(crate) fn not_found(message: &str) -> Response {
    simple_page(
        StatusCode::NOT_FOUND,
        "404 Not Found",
        message,
        "This fwdcast share may have expired or never existed.",
    )
}

/// 503 page: viewer cap reached; carries `Retry-After`
pub(crate) fn too_many_viewers(message: &str) -> Response {
    let mut response = simple_page(
        StatusCode::SERVICE_UNAVAILABLE,
        "503 Too Many Viewers",
        message,
        "This share has reached its viewer limit. Please try again in a few moments.",
    );
    response.headers_mut().insert(
        header::RETRY_AFTER,
        HeaderValue::from_str(&RETRY_AFTER_SECS.to_string())
            .unwrap_or(HeaderValue::from_static("30")),
    );
    response
}

/// 504 page: the origin did not answer in time
pub(crate) fn gateway_timeout(message: &str) -> Response {
    simple_page(
        StatusCode::GATEWAY_TIMEOUT,
        "504 Gateway Timeout",
        message,
        "The sharer's computer did not respond in time. It may be offline or on a slow connection.",
    )
}

/// Password prompt for protected shares
pub(crate) fn login(session_id: &str, redirect: &str, show_error: bool) -> Response {
    let error_html = if show_error {
        "<div class=\"error\">Incorrect password. Please try again.</div>"
    } else {
        ""
    };
    let sid = escape(session_id);
    let redirect = escape(redirect);
    let body = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n  <title>Password Required - fwdcast</title>\n  \
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n  <style>{PAGE_STYLE} \
    form {{ text-align: left; }} \
    .error {{ background: rgba(231,76,60,0.2); border: 1px solid #e74c3c; color: #e74c3c; \
padding: 10px 16px; border-radius: 4px; margin-bottom: 20px; font-size: 14px; }} \
    input[type=\"password\"] {{ width: 100%; box-sizing: border-box; padding: 12px; \
border: 1px solid #3c3c3c; border-radius: 4px; background: #1e1e1e; color: #cccccc; \
font-size: 16px; margin-bottom: 20px; }} \
    button {{ width: 100%; padding: 12px; background: #007acc; color: white; border: none; \
border-radius: 4px; font-size: 16px; cursor: pointer; }} \
    button:hover {{ background: #005a9e; }}</style>\n</head>\n<body>\n  \
<div class=\"container\">\n    <h1>Password Required</h1>\n    \
<p>This share is password protected</p>\n    {error_html}\n    \
<form method=\"POST\" action=\"/{sid}/__auth__?redirect={redirect}\">\n      \
<input type=\"password\" name=\"password\" placeholder=\"Enter password\" autofocus required>\n      \
<button type=\"submit\">Access Files</button>\n    </form>\n  </div>\n</body>\n</html>"
    );
    html_response(StatusCode::OK, body)
}

/// 429 countdown page after too many failed password attempts
pub(crate) fn rate_limited(session_id: &str, redirect: &str, seconds_remaining: u64) -> Response {
    let sid = escape(session_id);
    let redirect = escape(redirect);
    let body = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n  <title>Too Many Attempts - fwdcast</title>\n  \
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n  \
<meta http-equiv=\"refresh\" content=\"{seconds_remaining};url=/{sid}/__auth__?redirect={redirect}\">\n  \
<style>{PAGE_STYLE} .countdown {{ color: #cccccc; font-size: 32px; font-weight: bold; }}</style>\n\
</head>\n<body>\n  <div class=\"container\">\n    <h1>Too Many Attempts</h1>\n    \
<p>Please wait before trying again</p>\n    \
<p class=\"countdown\">{seconds_remaining}</p>\n    \
<p class=\"hint\">seconds remaining</p>\n  </div>\n</body>\n</html>"
    );
    html_response(StatusCode::TOO_MANY_REQUESTS, body)
}
