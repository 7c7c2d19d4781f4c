//! Viewer-facing HTTP server and request bridge
//!
//! The router exposes the origin registration endpoint at `/ws`; every other
//! path is parsed as `/{session-id}/{resource}` and bridged across the
//! session's duplex channel: admission check, REQUEST dispatch, then a
//! bounded wait for the origin's RESPONSE, after which the body streams
//! straight from DATA frames into the viewer's socket.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{Request, State, WebSocketUpgrade};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use futures_util::Stream;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::protocol::Frame;
use crate::relay::auth;
use crate::relay::duplex;
use crate::relay::pages;
use crate::relay::session::{PendingRequest, ResponseHead};
use crate::relay::store::{generate_request_id, spawn_sweeper, Admission, SessionStore};

/// Largest accepted login form body
const AUTH_BODY_LIMIT: usize = 16 * 1024;

/// Shared state behind every handler
#[derive(Clone)]
pub(crate) struct AppState {
    store: Arc<SessionStore>,
    config: Arc<RelayConfig>,
}

/// Build the relay router over an existing session store
#[must_use]
pub fn build_router(store: Arc<SessionStore>, config: Arc<RelayConfig>) -> Router {
    let state = AppState { store, config };
    Router::new()
        .route("/ws", any(origin_ws))
        .fallback(viewer_dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The public relay server
pub struct RelayServer {
    config: RelayConfig,
}

impl RelayServer {
    /// Create a relay server from its configuration
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Run the server until the process is killed
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or binding fails.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or binding fails.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let config = self.config;
        config.validate().map_err(|e| anyhow::anyhow!(e))?;

        let public_base = config.resolve_public_base();
        let store = Arc::new(SessionStore::new(public_base, config.max_viewers));
        let (sweeper, sweeper_stop) = spawn_sweeper(Arc::clone(&store), config.sweep_interval);

        let listen = config.listen;
        let app = build_router(store, Arc::new(config));
        let listener = TcpListener::bind(listen).await?;

        tracing::info!(listen = %listen, "starting relay server");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        let _ = sweeper_stop.send(());
        sweeper.await.ok();
        tracing::info!("relay server shut down");
        Ok(())
    }
}

/// `/ws`: upgrade and hand the socket to the duplex loop
async fn origin_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| duplex::handle_origin_socket(state.store, socket))
}

/// Split a request path into `(session_id, resource_path)`
fn split_path(path: &str) -> Option<(String, String)> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.split_once('/') {
        Some((sid, rest)) => Some((sid.to_string(), format!("/{rest}"))),
        None => Some((trimmed.to_string(), "/".to_string())),
    }
}

/// Everything that is not `/ws`: the viewer request path
async fn viewer_dispatch(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let method = parts.method;
    let uri = parts.uri;
    let headers = parts.headers;

    let Some((session_id, resource)) = split_path(uri.path()) else {
        return pages::not_found("Invalid URL");
    };

    let Some(session) = state.store.get(&session_id) else {
        return pages::not_found("Session not found or expired");
    };

    // Password gate. The auth subflow only exists for protected shares; on an
    // open share `__auth__` is just another (nonexistent) origin path.
    if let Some(password_hash) = session.password_hash.clone() {
        if resource.starts_with(&format!("/{}", auth::AUTH_PATH)) {
            let form_body = match axum::body::to_bytes(body, AUTH_BODY_LIMIT).await {
                Ok(bytes) => bytes,
                Err(_) => return pages::not_found("Invalid URL"),
            };
            return auth::handle_auth(
                &state.config,
                session,
                password_hash,
                &method,
                uri.query(),
                form_body,
            )
            .await;
        }

        if !auth::cookie_authorized(&headers, &session) {
            return auth::redirect_to_login(&session_id, &resource);
        }
    }

    if method != Method::GET && method != Method::HEAD {
        return pages::not_found("Invalid URL");
    }

    // Admission: the slot is held by a guard that travels with the response
    // body, so it frees exactly when streaming finishes.
    match state.store.increment_viewers(&session_id) {
        Admission::NotFound => return pages::not_found("Session not found or expired"),
        Admission::MaxReached => {
            return pages::too_many_viewers("Too many viewers. Please try again later.")
        }
        Admission::Admitted => {}
    }
    let viewer_guard = ViewerGuard {
        store: Arc::clone(&state.store),
        session_id: session_id.clone(),
    };

    let request_id = generate_request_id();
    let (pending, head_rx, body_rx) = PendingRequest::open(request_id.clone());
    if !state.store.add_pending(&session_id, pending) {
        return pages::not_found("Session not found or expired");
    }
    let pending_guard = PendingGuard {
        store: Arc::clone(&state.store),
        session_id: session_id.clone(),
        request_id: request_id.clone(),
    };

    let frame = Frame::Request {
        id: request_id,
        method: method.to_string(),
        path: resource,
    };
    if session.send_frame(frame).await.is_err() {
        return pages::gateway_timeout("The sharer's computer is not responding.");
    }

    match timeout(state.config.request_timeout, head_rx).await {
        Err(_) => pages::gateway_timeout("Request timed out."),
        Ok(Err(_)) => pages::gateway_timeout("The sharer's computer disconnected."),
        Ok(Ok(head)) => stream_response(head, body_rx, viewer_guard, pending_guard),
    }
}

/// Turn the origin's response head plus the live body channel into the
/// viewer's streaming response
fn stream_response(
    head: ResponseHead,
    body_rx: mpsc::Receiver<Bytes>,
    viewer_guard: ViewerGuard,
    pending_guard: PendingGuard,
) -> Response {
    let status = StatusCode::from_u16(head.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let body = Body::from_stream(TrackedBody {
        inner: ReceiverStream::new(body_rx),
        _viewer: viewer_guard,
        _pending: pending_guard,
    });

    let mut response = Response::new(body);
    *response.status_mut() = status;
    for (name, value) in &head.headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => tracing::debug!(header = %name, "dropped invalid origin header"),
        }
    }
    response
}

/// Releases a viewer slot when the response (or the viewer) goes away
struct ViewerGuard {
    store: Arc<SessionStore>,
    session_id: String,
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        self.store.decrement_viewers(&self.session_id);
    }
}

/// Clears the pending-request entry on any exit path; END has usually
/// removed it already, in which case this is a no-op
struct PendingGuard {
    store: Arc<SessionStore>,
    session_id: String,
    request_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.store.remove_pending(&self.session_id, &self.request_id);
    }
}

/// Response body stream that owns the admission and pending guards
struct TrackedBody {
    inner: ReceiverStream<Bytes>,
    _viewer: ViewerGuard,
    _pending: PendingGuard,
}

impl Stream for TrackedBody {
    type Item = std::result::Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|chunk| chunk.map(Ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(
            split_path("/abc123/dir/file.txt"),
            Some(("abc123".to_string(), "/dir/file.txt".to_string()))
        );
        assert_eq!(
            split_path("/abc123/"),
            Some(("abc123".to_string(), "/".to_string()))
        );
        assert_eq!(
            split_path("/abc123"),
            Some(("abc123".to_string(), "/".to_string()))
        );
        assert_eq!(split_path("/"), None);
        assert_eq!(split_path(""), None);
    }

    #[tokio::test]
    async fn test_stream_response_shapes_headers() {
        let store = Arc::new(SessionStore::new("http://relay.test", 3));
        let (_body_tx, body_rx) = mpsc::channel(1);

        let head = ResponseHead {
            status: 200,
            headers: std::collections::HashMap::from([
                ("Content-Type".to_string(), "text/plain".to_string()),
                ("Bad\nName".to_string(), "x".to_string()),
            ]),
        };
        let response = stream_response(
            head,
            body_rx,
            ViewerGuard {
                store: Arc::clone(&store),
                session_id: "abc".to_string(),
            },
            PendingGuard {
                store,
                session_id: "abc".to_string(),
                request_id: "r1".to_string(),
            },
        );

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            &HeaderValue::from_static("text/plain")
        );
        assert_eq!(response.headers().len(), 1, "invalid header dropped");
    }

    #[tokio::test]
    async fn test_stream_response_invalid_status_maps_to_502() {
        let store = Arc::new(SessionStore::new("http://relay.test", 3));
        let (_body_tx, body_rx) = mpsc::channel(1);
        let head = ResponseHead {
            status: 0,
            headers: Default::default(),
        };
        let response = stream_response(
            head,
            body_rx,
            ViewerGuard {
                store: Arc::clone(&store),
                session_id: "abc".to_string(),
            },
            PendingGuard {
                store,
                session_id: "abc".to_string(),
                request_id: "r1".to_string(),
            },
        );
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
