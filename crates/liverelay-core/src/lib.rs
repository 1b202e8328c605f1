//! Core types for Live Relay: session registry, event channels, config, errors.

pub mod config;
pub mod error;
pub mod params;
pub mod producer;
pub mod registry;
pub mod session;

pub use error::{RelayError, Result};
pub use params::Params;
pub use producer::Producer;
pub use registry::{SessionRegistry, SessionStatus};
pub use session::{EventSender, EventStream, SessionId};
