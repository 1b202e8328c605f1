//! WebSocket connection lifecycle: session handshake, then the relay loop.
//!
//! The client's first message is its session id as text. Once the id is
//! bound to a registered session, every event the producer enqueues is sent
//! as one JSON text message, in enqueue order. Every failure here ends this
//! connection only.
//!
//! There is no reconnect or replay: once a connection drops, the session is
//! removed and events enqueued afterwards are lost.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use liverelay_core::{EventStream, Producer, RelayError, Result, SessionId};

use crate::state::GatewayState;

/// Close code sent when the announced session is not registered.
pub const CLOSE_UNKNOWN_SESSION: u16 = 4404;
/// Close code sent when another connection already owns the session.
pub const CLOSE_ALREADY_ATTACHED: u16 = 4409;
/// Close code sent when the first message is missing, late, or not text.
pub const CLOSE_BAD_HANDSHAKE: u16 = 4400;

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Why a relay loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// Every sender was dropped and the queue is drained.
    ProducerFinished,
    /// The client closed the socket or it went away.
    ClientClosed,
    /// The session was removed from the registry underneath the relay.
    SessionRemoved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySummary {
    pub delivered: u64,
    pub end: RelayEnd,
}

/// Handle a new WebSocket connection on `/socket`.
pub async fn handle_ws_connection<P: Producer>(state: Arc<GatewayState<P>>, ws: WebSocket) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let handshake = tokio::time::timeout(
        state.config.handshake_timeout(),
        read_handshake(&mut ws_rx),
    )
    .await
    .unwrap_or_else(|_| Err(RelayError::Handshake("timed out waiting for session id".into())));

    let attached = handshake.and_then(|id| state.sessions.attach(&id).map(|events| (id, events)));
    let (session_id, mut events) = match attached {
        Ok(bound) => bound,
        Err(e) => {
            warn!(kind = e.kind(), %e, "Rejecting relay connection");
            #[cfg(feature = "metrics")]
            crate::metrics::record_error(e.kind());
            if !matches!(e, RelayError::Transport(_)) {
                send_close(&mut ws_tx, close_code_for(&e), close_reason_for(&e)).await;
            }
            return;
        }
    };

    info!(session_id = %session_id, "Relay bound");
    #[cfg(feature = "metrics")]
    crate::metrics::record_relay_connect();

    match relay_events(&mut ws_tx, &mut ws_rx, &mut events).await {
        Ok(summary) => {
            info!(
                session_id = %session_id,
                delivered = summary.delivered,
                end = ?summary.end,
                "Relay finished"
            );
            match summary.end {
                RelayEnd::ProducerFinished => {
                    send_close(&mut ws_tx, CLOSE_NORMAL, Utf8Bytes::from_static("done")).await;
                }
                RelayEnd::SessionRemoved => {
                    send_close(&mut ws_tx, CLOSE_GOING_AWAY, Utf8Bytes::from_static("session removed"))
                        .await;
                }
                RelayEnd::ClientClosed => {}
            }
        }
        Err(e) => {
            warn!(session_id = %session_id, kind = e.kind(), %e, "Relay failed");
            #[cfg(feature = "metrics")]
            crate::metrics::record_error(e.kind());
            if matches!(e, RelayError::Serialization(_)) {
                send_close(&mut ws_tx, close_code_for(&e), close_reason_for(&e)).await;
            }
        }
    }

    drop(events);
    state.sessions.remove(&session_id);
    #[cfg(feature = "metrics")]
    crate::metrics::record_relay_disconnect();
    debug!(session_id = %session_id, "Relay connection closed");
}

/// Wait for the client's first message and parse it as a session id.
///
/// Ping/pong frames are skipped; anything else that is not text fails the
/// handshake.
pub async fn read_handshake<S>(ws_rx: &mut S) -> Result<SessionId>
where
    S: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
{
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => return text.as_str().parse(),
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(Message::Binary(_)) => {
                return Err(RelayError::Handshake(
                    "expected session id as a text message".into(),
                ));
            }
            Ok(Message::Close(_)) => {
                return Err(RelayError::Handshake("connection closed during handshake".into()));
            }
            Err(e) => return Err(RelayError::Transport(e.to_string())),
        }
    }
    Err(RelayError::Handshake("connection dropped during handshake".into()))
}

/// Forward `events` to `ws_tx` until the producer finishes, the client goes
/// away, or the session is removed.
///
/// Inbound traffic other than a close is ignored; it is only watched so a
/// disconnect is noticed while no events are flowing.
pub async fn relay_events<E, Tx, Rx>(
    ws_tx: &mut Tx,
    ws_rx: &mut Rx,
    events: &mut EventStream<E>,
) -> Result<RelaySummary>
where
    E: Serialize,
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
{
    let done = events.done().clone();
    let mut delivered = 0u64;

    loop {
        tokio::select! {
            biased;

            event = events.recv() => {
                let Some(event) = event else {
                    return Ok(RelaySummary { delivered, end: RelayEnd::ProducerFinished });
                };
                let text = serde_json::to_string(&event)?;
                ws_tx
                    .send(Message::Text(text.into()))
                    .await
                    .map_err(|e| RelayError::Transport(e.to_string()))?;
                delivered += 1;
                #[cfg(feature = "metrics")]
                crate::metrics::record_event_relayed();
            }

            incoming = ws_rx.next() => match incoming {
                None | Some(Ok(Message::Close(_))) => {
                    return Ok(RelaySummary { delivered, end: RelayEnd::ClientClosed });
                }
                Some(Err(e)) => return Err(RelayError::Transport(e.to_string())),
                Some(Ok(_)) => {}
            },

            () = done.cancelled() => {
                return Ok(RelaySummary { delivered, end: RelayEnd::SessionRemoved });
            }
        }
    }
}

fn close_code_for(err: &RelayError) -> u16 {
    match err {
        RelayError::UnknownSession(_) | RelayError::MalformedSessionId(_) => CLOSE_UNKNOWN_SESSION,
        RelayError::AlreadyAttached(_) => CLOSE_ALREADY_ATTACHED,
        RelayError::Serialization(_) => CLOSE_INTERNAL_ERROR,
        _ => CLOSE_BAD_HANDSHAKE,
    }
}

fn close_reason_for(err: &RelayError) -> Utf8Bytes {
    Utf8Bytes::from_static(match err {
        RelayError::UnknownSession(_) | RelayError::MalformedSessionId(_) => "unknown session",
        RelayError::AlreadyAttached(_) => "session already attached",
        RelayError::Serialization(_) => "event serialization failed",
        _ => "bad handshake",
    })
}

async fn send_close<Tx>(ws_tx: &mut Tx, code: u16, reason: Utf8Bytes)
where
    Tx: Sink<Message> + Unpin,
{
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame { code, reason })))
        .await;
}
