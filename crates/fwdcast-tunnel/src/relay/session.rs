//! Per-session state on the relay
//!
//! A [`Session`] is one origin-relay binding: the outbound half of its duplex
//! channel, its expiry instant, the viewer admission counter, the optional
//! password hash with its rate-limit counters, and the map of pending viewer
//! requests awaiting origin responses.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::protocol::Frame;

/// Body chunks buffered per in-flight request. One chunk keeps memory bounded
/// while the OS socket buffer absorbs bursts.
pub(crate) const BODY_CHANNEL_CAPACITY: usize = 1;

/// Outbound frames queued per session before registration writes block
pub(crate) const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Auth cookie tokens remembered per session (one per authenticated viewer)
const MAX_AUTH_TOKENS: usize = 16;

/// Messages consumed by the session's single channel-writer task
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Send one frame to the origin
    Frame(Frame),
    /// Close the channel after flushing
    Close,
}

/// Status line and headers of an origin response, delivered to the waiting
/// viewer handler
#[derive(Debug)]
pub struct ResponseHead {
    /// HTTP status code
    pub status: u16,
    /// Response headers as sent by the origin
    pub headers: HashMap<String, String>,
}

/// Streaming state for an in-flight response, created on the RESPONSE frame
/// and dropped on END. Owned by the session's duplex reader.
#[derive(Debug)]
pub(crate) struct ResponseState {
    /// Sink feeding the viewer's response body
    pub body: mpsc::Sender<Bytes>,
}

/// A viewer request awaiting its origin response.
///
/// Dropping the request (or either of its channel ends) signals `done` to
/// whichever side is still waiting.
#[derive(Debug)]
pub struct PendingRequest {
    /// Request identifier, unique within the session
    pub id: String,
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    body_tx: mpsc::Sender<Bytes>,
}

impl PendingRequest {
    /// Create a pending request along with the receiving ends the viewer
    /// handler waits on
    #[must_use]
    pub fn open(
        id: impl Into<String>,
    ) -> (Self, oneshot::Receiver<ResponseHead>, mpsc::Receiver<Bytes>) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        (
            Self {
                id: id.into(),
                head_tx: Some(head_tx),
                body_tx,
            },
            head_rx,
            body_rx,
        )
    }

    fn take_channels(&mut self) -> Option<(oneshot::Sender<ResponseHead>, mpsc::Sender<Bytes>)> {
        let head_tx = self.head_tx.take()?;
        Some((head_tx, self.body_tx.clone()))
    }
}

/// Outcome of a rate-limit check before a password attempt
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AuthThrottle {
    /// The attempt may proceed
    Allowed,
    /// Too many recent failures; retry after the given duration
    Limited {
        /// Time until the next attempt is allowed
        retry_in: Duration,
    },
}

#[derive(Debug, Default)]
struct SessionState {
    viewer_count: usize,
    failed_auth: u32,
    last_auth_attempt: Option<Instant>,
    auth_tokens: Vec<String>,
    pending: HashMap<String, PendingRequest>,
}

/// An active origin-relay binding
#[derive(Debug)]
pub struct Session {
    /// Session identifier (12 lowercase hex characters)
    pub id: String,
    /// Wall-clock expiry; never extended for the session's lifetime
    pub expires_at: SystemTime,
    /// Viewer admission cap
    pub max_viewers: usize,
    /// Argon2 hash of the share password; `None` for open shares
    pub password_hash: Option<String>,
    outbound: mpsc::Sender<Outbound>,
    state: Mutex<SessionState>,
}

impl Session {
    pub(crate) fn new(
        id: String,
        outbound: mpsc::Sender<Outbound>,
        expires_at: SystemTime,
        max_viewers: usize,
        password_hash: Option<String>,
    ) -> Self {
        Self {
            id,
            expires_at,
            max_viewers,
            password_hash,
            outbound,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Check whether the session's expiry has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    /// Send a frame to the origin over the duplex channel.
    ///
    /// Writes from concurrent viewer handlers are serialized by the session's
    /// single writer task.
    ///
    /// # Errors
    ///
    /// Returns a session error if the channel is closed.
    pub async fn send_frame(&self, frame: Frame) -> Result<()> {
        self.outbound
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| Error::session("duplex channel closed"))
    }

    /// Queue a message without blocking; used for best-effort expiry notices
    pub(crate) fn try_send(&self, message: Outbound) -> bool {
        self.outbound.try_send(message).is_ok()
    }

    // -------------------------------------------------------------------------
    // Viewer admission
    // -------------------------------------------------------------------------

    /// Admit one viewer if below the cap
    pub(crate) fn try_admit(&self) -> bool {
        let mut state = self.state.lock();
        if state.viewer_count >= self.max_viewers {
            return false;
        }
        state.viewer_count += 1;
        true
    }

    /// Release one viewer slot, clamping at zero
    pub(crate) fn release_viewer(&self) {
        let mut state = self.state.lock();
        state.viewer_count = state.viewer_count.saturating_sub(1);
    }

    /// Current number of admitted viewers
    #[must_use]
    pub fn viewer_count(&self) -> usize {
        self.state.lock().viewer_count
    }

    // -------------------------------------------------------------------------
    // Pending requests
    // -------------------------------------------------------------------------

    /// Register a pending request. Returns `false` if the id is already
    /// in flight (each id admits exactly one pending request).
    pub(crate) fn add_pending(&self, request: PendingRequest) -> bool {
        let mut state = self.state.lock();
        if state.pending.contains_key(&request.id) {
            return false;
        }
        state.pending.insert(request.id.clone(), request);
        true
    }

    /// Claim the response channels for a request id on its RESPONSE frame.
    ///
    /// Returns `None` for unknown ids and for ids whose response already
    /// started, which keeps a second RESPONSE from restarting a stream.
    pub(crate) fn take_response_channels(
        &self,
        request_id: &str,
    ) -> Option<(oneshot::Sender<ResponseHead>, mpsc::Sender<Bytes>)> {
        let mut state = self.state.lock();
        state.pending.get_mut(request_id)?.take_channels()
    }

    /// Remove a pending request; dropping it signals done to the waiter
    pub(crate) fn remove_pending(&self, request_id: &str) -> Option<PendingRequest> {
        self.state.lock().pending.remove(request_id)
    }

    /// Abort every pending request, signalling done to all waiters
    pub(crate) fn abort_all_pending(&self) {
        let pending = std::mem::take(&mut self.state.lock().pending);
        drop(pending);
    }

    /// Number of requests currently awaiting a response
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    // -------------------------------------------------------------------------
    // Password authentication
    // -------------------------------------------------------------------------

    /// Rate-limit gate run before each password attempt. Resets the failure
    /// counter once the window has passed and stamps the attempt time.
    pub(crate) fn check_auth_throttle(&self, window: Duration, max_failures: u32) -> AuthThrottle {
        let mut state = self.state.lock();
        if state.failed_auth >= max_failures {
            if let Some(last) = state.last_auth_attempt {
                let since = last.elapsed();
                if since < window {
                    return AuthThrottle::Limited {
                        retry_in: window - since,
                    };
                }
            }
            state.failed_auth = 0;
        }
        state.last_auth_attempt = Some(Instant::now());
        AuthThrottle::Allowed
    }

    /// Record a failed password attempt
    pub(crate) fn record_auth_failure(&self) {
        self.state.lock().failed_auth += 1;
    }

    /// Clear the failure counter after a successful attempt
    pub(crate) fn reset_auth_failures(&self) {
        self.state.lock().failed_auth = 0;
    }

    /// Number of failed password attempts in the current window
    #[must_use]
    pub fn failed_auth_count(&self) -> u32 {
        self.state.lock().failed_auth
    }

    /// Issue a fresh opaque cookie token for an authenticated viewer.
    ///
    /// The session remembers a bounded number of tokens so several viewers
    /// can hold cookies at once; the oldest token is evicted past the cap.
    pub(crate) fn issue_auth_token(&self) -> String {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let mut state = self.state.lock();
        state.auth_tokens.push(token.clone());
        if state.auth_tokens.len() > MAX_AUTH_TOKENS {
            state.auth_tokens.remove(0);
        }
        token
    }

    /// Check a cookie token against the session's issued tokens
    pub(crate) fn check_auth_token(&self, token: &str) -> bool {
        self.state.lock().auth_tokens.iter().any(|t| t == token)
    }
}
