//! Process-wide session registry.
//!
//! Maps a [`SessionId`] to the consumer half of its event channel until a
//! relay attaches. The entry stays behind (stream taken) while the relay runs
//! so a second attach is rejected. Entries leave the map when the relay ends
//! ([`SessionRegistry::remove`]) or when they were never attached and outlive
//! the pending TTL ([`SessionRegistry::remove_expired`]).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::session::{event_channel, EventSender, EventStream, SessionId};

struct Entry<E> {
    pending: Option<EventStream<E>>,
    done: CancellationToken,
    created_at: Instant,
}

/// Read-only snapshot of a registry entry.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub id: SessionId,
    pub attached: bool,
    pub created_at: Instant,
    /// Whether the session's done signal has fired.
    pub is_done: bool,
}

pub struct SessionRegistry<E> {
    entries: Mutex<HashMap<SessionId, Entry<E>>>,
}

impl<E> Default for SessionRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> SessionRegistry<E> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    // Every critical section is a single insert/remove/take, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Entry<E>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fresh session and return its id and producer handle.
    ///
    /// The entry is installed before this returns, so the id is attachable as
    /// soon as the caller hands it to a client.
    pub fn create(&self) -> (SessionId, EventSender<E>) {
        let mut entries = self.lock();
        let mut id = SessionId::new();
        while entries.contains_key(&id) {
            id = SessionId::new();
        }

        let (sender, stream) = event_channel(id);
        entries.insert(
            id,
            Entry {
                done: stream.done().clone(),
                pending: Some(stream),
                created_at: Instant::now(),
            },
        );
        debug!(session_id = %id, sessions = entries.len(), "Session created");
        (id, sender)
    }

    pub fn lookup(&self, id: &SessionId) -> Option<SessionStatus> {
        self.lock().get(id).map(|entry| SessionStatus {
            id: *id,
            attached: entry.pending.is_none(),
            created_at: entry.created_at,
            is_done: entry.done.is_cancelled(),
        })
    }

    /// Take the session's event stream for a relay.
    ///
    /// Only the first attach succeeds; later ones get
    /// [`RelayError::AlreadyAttached`].
    pub fn attach(&self, id: &SessionId) -> Result<EventStream<E>> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| RelayError::UnknownSession(id.to_string()))?;
        entry
            .pending
            .take()
            .ok_or_else(|| RelayError::AlreadyAttached(id.to_string()))
    }

    /// Drop a session and fire its done signal. Returns whether it existed.
    pub fn remove(&self, id: &SessionId) -> bool {
        let removed = self.lock().remove(id);
        match removed {
            Some(entry) => {
                entry.done.cancel();
                debug!(session_id = %id, "Session removed");
                true
            }
            None => false,
        }
    }

    /// Evict sessions that were never attached and are older than `ttl`.
    pub fn remove_expired(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| {
            let stale = entry.pending.is_some() && now.duration_since(entry.created_at) >= ttl;
            if stale {
                entry.done.cancel();
            }
            !stale
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
