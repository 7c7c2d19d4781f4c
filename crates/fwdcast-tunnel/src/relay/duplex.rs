//! Per-session duplex loop on the relay
//!
//! One task owns each origin WebSocket. It performs the registration
//! handshake, then multiplexes: outbound frames (REQUEST, EXPIRED) flow from
//! the session's channel to the socket, and inbound RESPONSE/DATA/END frames
//! are routed to the pending viewer request they answer. Being the single
//! reader per session preserves RESPONSE -> DATA* -> END ordering naturally.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::protocol::{decode_chunk, Frame};
use crate::relay::auth;
use crate::relay::session::{Outbound, ResponseHead, ResponseState, Session};
use crate::relay::store::{outbound_channel, SessionStore};

/// How long a fresh connection may take to send its REGISTER frame
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Drive one origin connection from registration to teardown
pub(crate) async fn handle_origin_socket(store: Arc<SessionStore>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    let registration = match timeout(REGISTER_TIMEOUT, read_frame(&mut stream)).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "registration failed");
            return;
        }
        Err(_) => {
            tracing::debug!("registration timed out");
            return;
        }
    };

    let Frame::Register {
        path,
        expires_at,
        password,
    } = registration
    else {
        tracing::debug!(kind = registration.kind(), "expected REGISTER frame");
        return;
    };

    let expires_at = UNIX_EPOCH + Duration::from_secs(expires_at.unsigned_abs());
    if expires_at <= SystemTime::now() {
        tracing::debug!("rejected registration with expiry in the past");
        return;
    }

    let password_hash = if password.is_empty() {
        None
    } else {
        match auth::hash_password(password).await {
            Ok(hash) => Some(hash),
            Err(e) => {
                tracing::error!(error = %e, "password hashing failed");
                return;
            }
        }
    };

    let (outbound_tx, mut outbound_rx) = outbound_channel();
    let session = store.create(outbound_tx, expires_at, password_hash);
    let session_id = session.id.clone();
    let url = store.url_for(&session_id);

    tracing::info!(
        session_id = %session_id,
        path = %path,
        url = %url,
        "origin registered"
    );

    let registered = Frame::Registered {
        session_id: session_id.clone(),
        url,
    };
    if let Err(e) = send_frame(&mut sink, &registered).await {
        tracing::warn!(session_id = %session_id, error = %e, "failed to acknowledge registration");
        store.remove(&session_id);
        return;
    }

    // Streaming state per in-flight response, created on RESPONSE and
    // dropped on END. Scoped to this session's reader.
    let mut streams: HashMap<String, ResponseState> = HashMap::new();

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = send_frame(&mut sink, &frame).await {
                            tracing::debug!(session_id = %session_id, error = %e, "channel write failed");
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => break,
                }
            }

            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match Frame::decode(text.as_str()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!(session_id = %session_id, error = %e, "bad frame from origin");
                                break;
                            }
                        };
                        if let Err(e) = route_frame(&session, &mut streams, frame).await {
                            tracing::warn!(session_id = %session_id, error = %e, "protocol violation");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(session_id = %session_id, "origin disconnected");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::warn!(session_id = %session_id, "unexpected binary frame from origin");
                        break;
                    }
                    Some(Ok(_)) => {} // ping/pong
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session_id, error = %e, "channel read failed");
                        break;
                    }
                }
            }
        }
    }

    // Removing the session aborts every pending request, unblocking their
    // viewer handlers within bounded time.
    store.remove(&session_id);
    tracing::info!(session_id = %session_id, "session ended");
}

/// Route one origin frame to the pending request it answers.
///
/// Frames for unknown or already-completed request ids are dropped with a log
/// line; a frame type the origin must never send is a protocol error.
pub(crate) async fn route_frame(
    session: &Arc<Session>,
    streams: &mut HashMap<String, ResponseState>,
    frame: Frame,
) -> Result<()> {
    match frame {
        Frame::Response {
            id,
            status,
            headers,
        } => {
            match session.take_response_channels(&id) {
                Some((head_tx, body_tx)) => {
                    if head_tx.send(ResponseHead { status, headers }).is_err() {
                        // Viewer already gave up; keep the state so DATA
                        // frames drain harmlessly until END.
                        tracing::debug!(request_id = %id, "viewer gone before response");
                    }
                    streams.insert(id, ResponseState { body: body_tx });
                }
                None => {
                    tracing::debug!(request_id = %id, "response for unknown request");
                }
            }
            Ok(())
        }

        Frame::Data { id, chunk } => {
            let bytes = decode_chunk(&chunk)?;
            match streams.get(&id) {
                Some(state) => {
                    if state.body.send(Bytes::from(bytes)).await.is_err() {
                        tracing::debug!(request_id = %id, "viewer disconnected mid-stream");
                    }
                }
                None => {
                    tracing::debug!(request_id = %id, "data before response; dropped");
                }
            }
            Ok(())
        }

        Frame::End { id } => {
            streams.remove(&id);
            // Dropping the pending request signals done to the handler.
            session.remove_pending(&id);
            Ok(())
        }

        other => Err(Error::protocol(format!(
            "unexpected {} frame from origin",
            other.kind()
        ))),
    }
}

async fn read_frame(stream: &mut SplitStream<WebSocket>) -> Result<Frame> {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => return Frame::decode(text.as_str()),
            Ok(Message::Close(_)) => {
                return Err(Error::connection_msg("origin closed the channel"))
            }
            Ok(Message::Binary(_)) => return Err(Error::protocol("unexpected binary frame")),
            Ok(_) => {} // ping/pong
            Err(e) => return Err(Error::connection(e)),
        }
    }
    Err(Error::connection_msg("channel closed before registration"))
}

async fn send_frame(sink: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<()> {
    let text = frame.encode()?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(Error::connection)
}
