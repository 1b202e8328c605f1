//! Session identifiers and the two halves of a session's event channel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{RelayError, Result};

/// Opaque, unguessable session token.
///
/// Backed by a random (v4) UUID drawn from the OS CSPRNG and rendered in the
/// hyphenated textual form, which is also what clients send back on attach.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SessionId {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| RelayError::MalformedSessionId(s.to_string()))
    }
}

/// Producer half of a session's event channel.
///
/// Cloneable so a producer can hand copies to its own tasks. Once every
/// sender is dropped and the queue is drained, the relay ends the stream.
pub struct EventSender<E> {
    id: SessionId,
    tx: mpsc::UnboundedSender<E>,
    done: CancellationToken,
}

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tx: self.tx.clone(),
            done: self.done.clone(),
        }
    }
}

impl<E> fmt::Debug for EventSender<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<E> EventSender<E> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Enqueue an event for the session's relay.
    ///
    /// Fails with [`RelayError::SessionClosed`] once the client has gone away
    /// or the session was removed from the registry.
    pub fn send(&self, event: E) -> Result<()> {
        if self.done.is_cancelled() {
            return Err(RelayError::SessionClosed(self.id.to_string()));
        }
        self.tx
            .send(event)
            .map_err(|_| RelayError::SessionClosed(self.id.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves when the session is done: relay exited or entry removed.
    pub async fn closed(&self) {
        self.done.cancelled().await;
    }
}

/// Consumer half of a session's event channel, owned by exactly one relay.
///
/// Dropping the stream fires the session's done signal so producers stop.
pub struct EventStream<E> {
    id: SessionId,
    rx: mpsc::UnboundedReceiver<E>,
    done: CancellationToken,
}

impl<E> fmt::Debug for EventStream<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream").field("id", &self.id).finish()
    }
}

impl<E> EventStream<E> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Next event in enqueue order; `None` once every sender is gone and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Done signal shared with the producer side.
    pub fn done(&self) -> &CancellationToken {
        &self.done
    }
}

impl<E> Drop for EventStream<E> {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

/// Create a linked sender/stream pair for `id`.
pub(crate) fn event_channel<E>(id: SessionId) -> (EventSender<E>, EventStream<E>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let done = CancellationToken::new();
    (
        EventSender {
            id,
            tx,
            done: done.clone(),
        },
        EventStream { id, rx, done },
    )
}
