//! The computation behind a session.

use serde::Serialize;

use crate::params::Params;
use crate::session::EventSender;

/// Computes a session's initial result and, optionally, later updates.
///
/// `produce` runs synchronously on the request path. Implementations may move
/// `events` (or clones of it) into their own tasks and keep sending until
/// [`EventSender::send`] fails or [`EventSender::closed`] resolves, which
/// happens once the client disconnects or the session is evicted. Dropping
/// every sender ends the session's stream.
pub trait Producer: Send + Sync + 'static {
    /// Result rendered into the initial page.
    type Output: Serialize;

    /// Payload of each follow-up event.
    type Event: Serialize + Send + 'static;

    fn produce(
        &self,
        params: &Params,
        events: EventSender<Self::Event>,
    ) -> anyhow::Result<Self::Output>;
}
