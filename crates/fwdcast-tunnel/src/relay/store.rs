//! In-memory session store for the relay
//!
//! The store owns the map from session id to [`Session`], allocates ids,
//! enforces expiry, and mediates viewer admission and pending-request access.
//! Locking order is always store map first, then the session's own lock, and
//! no lock is held across channel I/O.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::protocol::Frame;
use crate::relay::session::{Outbound, PendingRequest, Session, OUTBOUND_CHANNEL_CAPACITY};

/// Outcome of a viewer admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A viewer slot was taken; the caller must release it
    Admitted,
    /// No live session with that id
    NotFound,
    /// The session is at its viewer cap
    MaxReached,
}

/// Generate a session id: 6 CSPRNG bytes as 12 lowercase hex characters
fn generate_session_id() -> String {
    let mut bytes = [0u8; 6];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a request id: 8 CSPRNG bytes as 16 lowercase hex characters
#[must_use]
pub fn generate_request_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Registry of active sessions
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    public_base: String,
    max_viewers: usize,
}

impl SessionStore {
    /// Create a store generating URLs under the given public base
    #[must_use]
    pub fn new(public_base: impl Into<String>, max_viewers: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            public_base: public_base.into(),
            max_viewers,
        }
    }

    /// Create a session bound to the given outbound channel.
    ///
    /// Generates a fresh id, retrying on the (vanishingly rare) collision.
    /// Never blocks on I/O.
    pub fn create(
        &self,
        outbound: mpsc::Sender<Outbound>,
        expires_at: SystemTime,
        password_hash: Option<String>,
    ) -> Arc<Session> {
        loop {
            let id = generate_session_id();
            match self.sessions.entry(id.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let session = Arc::new(Session::new(
                        id,
                        outbound,
                        expires_at,
                        self.max_viewers,
                        password_hash,
                    ));
                    slot.insert(Arc::clone(&session));
                    tracing::info!(
                        session_id = %session.id,
                        has_password = session.password_hash.is_some(),
                        "session registered"
                    );
                    return session;
                }
            }
        }
    }

    /// Look up a live session.
    ///
    /// A session whose expiry has passed is removed on the spot and reported
    /// as absent.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = {
            let entry = self.sessions.get(id)?;
            Arc::clone(entry.value())
        };

        if session.is_expired() {
            self.remove(id);
            return None;
        }

        Some(session)
    }

    /// Remove a session, aborting all of its pending requests. Idempotent.
    pub fn remove(&self, id: &str) {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.abort_all_pending();
            session.try_send(Outbound::Close);
            tracing::info!(session_id = %id, "session removed");
        }
    }

    /// Expire a session: best-effort EXPIRED notice, close the channel,
    /// then remove. Never blocks on other sessions.
    pub fn expire(&self, id: &str) {
        if let Some(entry) = self.sessions.get(id) {
            let session = Arc::clone(entry.value());
            drop(entry);
            session.try_send(Outbound::Frame(Frame::Expired));
            session.try_send(Outbound::Close);
        }
        self.remove(id);
    }

    /// Expire every session whose deadline has passed.
    ///
    /// Ids are snapshotted first so no map lock is held while notifying.
    /// Returns the number of sessions expired.
    pub fn expire_due(&self) -> usize {
        let now = SystemTime::now();
        let due: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| now >= entry.value().expires_at)
            .map(|entry| entry.key().clone())
            .collect();

        let count = due.len();
        for id in due {
            tracing::info!(session_id = %id, "session expired");
            self.expire(&id);
        }
        count
    }

    /// Take a viewer slot on the session
    #[must_use]
    pub fn increment_viewers(&self, id: &str) -> Admission {
        match self.get(id) {
            None => Admission::NotFound,
            Some(session) => {
                if session.try_admit() {
                    Admission::Admitted
                } else {
                    Admission::MaxReached
                }
            }
        }
    }

    /// Release a viewer slot; clamps at zero and ignores unknown sessions
    pub fn decrement_viewers(&self, id: &str) {
        if let Some(entry) = self.sessions.get(id) {
            entry.value().release_viewer();
        }
    }

    /// Register a pending request on a live session.
    ///
    /// Returns `false` when the session is gone (the caller should answer 404).
    #[must_use]
    pub fn add_pending(&self, session_id: &str, request: PendingRequest) -> bool {
        match self.get(session_id) {
            Some(session) => session.add_pending(request),
            None => false,
        }
    }

    /// Drop a pending request if it is still registered
    pub fn remove_pending(&self, session_id: &str, request_id: &str) {
        if let Some(entry) = self.sessions.get(session_id) {
            entry.value().remove_pending(request_id);
        }
    }

    /// Public URL for a session: `{public_base}/{id}/`
    #[must_use]
    pub fn url_for(&self, id: &str) -> String {
        format!("{}/{id}/", self.public_base.trim_end_matches('/'))
    }

    /// Number of live sessions in the store
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether a session id is present, expired or not (test helper)
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }
}

/// Spawn the expiry sweeper: one background task ticking on `interval`,
/// expiring due sessions until the returned sender fires.
pub fn spawn_sweeper(
    store: Arc<SessionStore>,
    interval: Duration,
) -> (JoinHandle<()>, oneshot::Sender<()>) {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = store.expire_due();
                    if expired > 0 {
                        tracing::debug!(expired, "sweeper pass");
                    }
                }
                _ = &mut stop_rx => {
                    tracing::debug!("sweeper stopped");
                    break;
                }
            }
        }
    });
    (handle, stop_tx)
}

/// Channel pair for a new session's outbound writer
#[must_use]
pub(crate) fn outbound_channel() -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
    mpsc::channel(OUTBOUND_CHANNEL_CAPACITY)
}
