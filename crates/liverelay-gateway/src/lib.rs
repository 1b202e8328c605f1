//! HTTP + WebSocket gateway for Live Relay.
//!
//! `GET /` opens a session, runs the producer and renders the initial page;
//! the page then connects to `/socket`, sends its session id, and receives
//! every event the producer pushes afterwards.

pub mod connection;
pub mod handler;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;

pub use server::{router, serve, start_gateway};
pub use state::GatewayState;
