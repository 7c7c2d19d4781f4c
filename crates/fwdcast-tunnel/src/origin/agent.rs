//! Origin tunnel agent
//!
//! The [`OriginAgent`] owns the outbound connection to the relay: it dials
//! the WebSocket, registers the share, surfaces the public URL through its
//! observer, then services incoming REQUEST frames with one task each.
//! Connection attempts before the session goes active retry on a fixed
//! backoff; once active, a lost connection is terminal.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::OriginConfig;
use crate::error::{Error, Result};
use crate::origin::serve::{serve_request, ServeContext, StatsCounters};
use crate::protocol::Frame;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// How long registration may wait for the REGISTERED acknowledgment
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for in-flight responses during shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

// =============================================================================
// Observer
// =============================================================================

/// Transfer totals for the current session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Requests fully serviced
    pub requests_served: u64,
    /// Raw body bytes sent (before base64 framing)
    pub bytes_sent: u64,
}

/// Callbacks surfaced by the agent. All methods default to no-ops, so an
/// observer implements only what it cares about.
pub trait OriginObserver: Send + Sync {
    /// The session is active and reachable at `url`
    fn on_url(&self, _url: &str) {}
    /// Transfer totals changed (called after each serviced request)
    fn on_stats(&self, _stats: TransferStats) {}
    /// The relay announced session expiry
    fn on_expired(&self) {}
    /// The duplex channel closed
    fn on_disconnect(&self) {}
    /// A connection-level error occurred
    fn on_error(&self, _error: &Error) {}
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl OriginObserver for NullObserver {}

// =============================================================================
// Agent State
// =============================================================================

/// Connection state machine of the agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AgentState {
    /// Not connected to the relay
    #[default]
    Disconnected,
    /// Opening the duplex channel
    Connecting,
    /// Channel open, REGISTER sent, awaiting acknowledgment
    Registering,
    /// Session established and serving viewers
    Active {
        /// Relay-assigned session id
        session_id: String,
    },
    /// Winding down: no new requests, draining in-flight responses
    Closing,
    /// Terminal state; the channel is gone
    Closed,
}

/// How an active session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionOutcome {
    Expired,
    Disconnected,
    Shutdown,
}

// =============================================================================
// Origin Agent
// =============================================================================

/// The origin-side tunnel agent
///
/// # Example
///
/// ```rust,no_run
/// use fwdcast_tunnel::{OriginAgent, OriginConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let config = OriginConfig::new("ws://relay.example.com:8080/ws", "/home/alice/share");
///     let agent = OriginAgent::new(config);
///     if let Err(e) = agent.run().await {
///         eprintln!("share ended: {e}");
///     }
/// }
/// ```
pub struct OriginAgent {
    config: OriginConfig,
    state: Arc<RwLock<AgentState>>,
    observer: Arc<dyn OriginObserver>,
    counters: Arc<StatsCounters>,
    shutdown_tx: watch::Sender<bool>,
}

impl OriginAgent {
    /// Create an agent for the given configuration
    #[must_use]
    pub fn new(config: OriginConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            state: Arc::new(RwLock::new(AgentState::Disconnected)),
            observer: Arc::new(NullObserver),
            counters: Arc::new(StatsCounters::default()),
            shutdown_tx,
        }
    }

    /// Attach an observer (builder pattern)
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn OriginObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Current agent state
    #[must_use]
    pub fn state(&self) -> AgentState {
        self.state.read().clone()
    }

    /// Whether a session is currently active
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(*self.state.read(), AgentState::Active { .. })
    }

    /// The active session id, if any
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        match &*self.state.read() {
            AgentState::Active { session_id } => Some(session_id.clone()),
            _ => None,
        }
    }

    /// Transfer totals for the current session
    #[must_use]
    pub fn stats(&self) -> TransferStats {
        self.counters.snapshot()
    }

    /// Request a graceful shutdown: stop taking requests, drain in-flight
    /// responses for a short grace period, then close the channel.
    pub fn cancel(&self) {
        self.shutdown_tx.send_replace(true);
    }

    fn set_state(&self, state: AgentState) {
        *self.state.write() = state;
    }

    /// Connect, register, and serve until the session ends.
    ///
    /// Retries the connection with a fixed backoff while the session has not
    /// yet gone active; once active, disconnection is terminal.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid config or share root,
    /// a connection error once retries are exhausted or an active session's
    /// channel fails, and `Ok(())` on expiry or cancellation.
    pub async fn run(&self) -> Result<()> {
        self.config.validate().map_err(Error::config)?;
        let root = tokio::fs::canonicalize(&self.config.root)
            .await
            .map_err(|e| {
                Error::config(format!(
                    "share root {}: {e}",
                    self.config.root.display()
                ))
            })?;

        let mut attempt: u32 = 0;
        loop {
            if *self.shutdown_tx.borrow() {
                self.set_state(AgentState::Closed);
                return Ok(());
            }

            attempt += 1;
            self.set_state(AgentState::Connecting);
            tracing::info!(attempt, url = %self.config.relay_url, "connecting to relay");

            match self.run_once(&root).await {
                Ok(SessionOutcome::Expired | SessionOutcome::Shutdown) => {
                    self.set_state(AgentState::Closed);
                    return Ok(());
                }
                Ok(SessionOutcome::Disconnected) => {
                    self.set_state(AgentState::Closed);
                    return Err(Error::connection_msg("relay closed the connection"));
                }
                Err(e) => {
                    if attempt >= self.config.max_retries {
                        self.observer.on_error(&e);
                        self.set_state(AgentState::Closed);
                        return Err(e);
                    }
                    tracing::warn!(attempt, error = %e, "connection failed; retrying");
                    sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    /// One connection attempt: dial, register, then run the session loop
    async fn run_once(&self, root: &Path) -> Result<SessionOutcome> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let (ws, _response) = connect_async(self.config.relay_url.as_str())
            .await
            .map_err(|e| Error::connection_msg(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        self.set_state(AgentState::Registering);

        let expires_at = SystemTime::now() + self.config.duration;
        let expires_secs = expires_at
            .duration_since(UNIX_EPOCH)
            .map_err(|_| Error::config("system clock before the Unix epoch"))?
            .as_secs();
        let register = Frame::Register {
            path: root.display().to_string(),
            expires_at: i64::try_from(expires_secs)
                .map_err(|_| Error::config("expiry out of range"))?,
            password: self.config.password.clone().unwrap_or_default(),
        };
        send_ws(&mut sink, &register).await?;

        let acknowledgment = timeout(REGISTER_TIMEOUT, read_ws(&mut stream))
            .await
            .map_err(|_| Error::timeout())??;
        let Frame::Registered { session_id, url } = acknowledgment else {
            return Err(Error::protocol(format!(
                "expected REGISTERED, got {}",
                acknowledgment.kind()
            )));
        };

        tracing::info!(session_id = %session_id, url = %url, "session active");
        self.observer.on_url(&url);
        self.set_state(AgentState::Active {
            session_id: session_id.clone(),
        });

        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(64);
        let ctx = Arc::new(ServeContext {
            root: root.to_path_buf(),
            session_id,
            out: out_tx,
            exclude: self.config.exclude.clone(),
            max_file_size: self.config.max_file_size,
            max_total_size: self.config.max_total_size,
            stats: Arc::clone(&self.counters),
            observer: Arc::clone(&self.observer),
        });
        let mut tasks: JoinSet<()> = JoinSet::new();

        if *shutdown_rx.borrow_and_update() {
            self.set_state(AgentState::Closing);
            let _ = sink.send(WsMessage::Close(None)).await;
            return Ok(SessionOutcome::Shutdown);
        }

        let outcome = 'session: loop {
            tokio::select! {
                frame = out_rx.recv() => {
                    // Request tasks always hold a sender via ctx, so this is
                    // Some until teardown.
                    let Some(frame) = frame else {
                        break 'session SessionOutcome::Disconnected;
                    };
                    if let Err(e) = send_ws(&mut sink, &frame).await {
                        tracing::warn!(error = %e, "channel write failed");
                        self.observer.on_disconnect();
                        break 'session SessionOutcome::Disconnected;
                    }
                }

                message = stream.next() => {
                    match message {
                        Some(Ok(WsMessage::Text(text))) => {
                            match Frame::decode(text.as_str()) {
                                Ok(Frame::Request { id, method, path }) => {
                                    tasks.spawn(serve_request(Arc::clone(&ctx), id, method, path));
                                }
                                Ok(Frame::Expired) => {
                                    tracing::info!("session expired");
                                    self.observer.on_expired();
                                    break 'session SessionOutcome::Expired;
                                }
                                Ok(other) => {
                                    tracing::warn!(kind = other.kind(), "unexpected frame from relay");
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "bad frame from relay");
                                    self.observer.on_disconnect();
                                    break 'session SessionOutcome::Disconnected;
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            tracing::info!("relay closed the channel");
                            self.observer.on_disconnect();
                            break 'session SessionOutcome::Disconnected;
                        }
                        Some(Ok(_)) => {} // ping/pong
                        Some(Err(e)) => {
                            let error = Error::connection(e);
                            self.observer.on_error(&error);
                            self.observer.on_disconnect();
                            break 'session SessionOutcome::Disconnected;
                        }
                    }
                }

                _ = shutdown_rx.changed() => {
                    tracing::info!("shutdown requested");
                    break 'session SessionOutcome::Shutdown;
                }
            }
        };

        self.set_state(AgentState::Closing);
        match outcome {
            SessionOutcome::Shutdown => {
                // No new requests are read; give in-flight tasks a grace
                // period to emit their END frames, then close.
                drop(ctx);
                let drain = async {
                    loop {
                        tokio::select! {
                            joined = tasks.join_next() => {
                                if joined.is_none() {
                                    while let Ok(frame) = out_rx.try_recv() {
                                        if send_ws(&mut sink, &frame).await.is_err() {
                                            return;
                                        }
                                    }
                                    return;
                                }
                            }
                            frame = out_rx.recv() => {
                                let Some(frame) = frame else { return };
                                if send_ws(&mut sink, &frame).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                };
                if timeout(SHUTDOWN_GRACE, drain).await.is_err() {
                    tracing::warn!("shutdown grace elapsed with requests in flight");
                }
                tasks.abort_all();
                let _ = sink.send(WsMessage::Close(None)).await;
            }
            SessionOutcome::Expired | SessionOutcome::Disconnected => {
                tasks.abort_all();
            }
        }

        Ok(outcome)
    }
}

async fn send_ws(sink: &mut WsSink, frame: &Frame) -> Result<()> {
    let text = frame.encode()?;
    sink.send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| Error::connection_msg(e.to_string()))
}

async fn read_ws(stream: &mut WsStream) -> Result<Frame> {
    while let Some(message) = stream.next().await {
        match message {
            Ok(WsMessage::Text(text)) => return Frame::decode(text.as_str()),
            Ok(WsMessage::Close(frame)) => {
                let reason = frame.map_or_else(
                    || "relay closed the connection".to_string(),
                    |f| f.reason.to_string(),
                );
                return Err(Error::connection_msg(reason));
            }
            Ok(_) => {} // ping/pong/binary
            Err(e) => return Err(Error::connection_msg(e.to_string())),
        }
    }
    Err(Error::connection_msg("connection closed before registration"))
}
