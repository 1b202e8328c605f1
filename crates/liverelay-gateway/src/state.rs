//! Gateway shared state.

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use liverelay_core::config::Config;
use liverelay_core::{Producer, SessionRegistry};

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState<P: Producer> {
    pub config: Arc<Config>,
    pub producer: Arc<P>,
    pub sessions: Arc<SessionRegistry<P::Event>>,
}

impl<P: Producer> GatewayState<P> {
    pub fn new(config: Arc<Config>, producer: P) -> Self {
        Self {
            config,
            producer: Arc::new(producer),
            sessions: Arc::new(SessionRegistry::new()),
        }
    }

    /// Spawn the background task that evicts sessions nobody attached to.
    ///
    /// The task holds only a weak reference and exits once the state is dropped.
    pub fn spawn_session_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.sweep_interval();
        let ttl = self.config.pending_session_ttl();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(state) = weak.upgrade() else {
                    debug!("Gateway state dropped, session sweeper exiting");
                    break;
                };
                let evicted = state.sessions.remove_expired(ttl);
                if evicted > 0 {
                    info!(evicted, remaining = state.sessions.len(), "Evicted unattached sessions");
                }
            }
        })
    }
}
