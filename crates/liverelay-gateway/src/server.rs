//! Axum-based HTTP + WebSocket server.

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use liverelay_core::Producer;

use crate::connection::handle_ws_connection;
use crate::handler::{page_handler, session_handler};
use crate::state::GatewayState;

/// Build the gateway router.
///
/// Named routes are registered before the static asset catch-all so they
/// take priority.
pub fn router<P: Producer>(state: Arc<GatewayState<P>>) -> Router {
    let app = Router::new()
        .route("/", get(page_handler::<P>))
        .route("/api/session", get(session_handler::<P>))
        .route("/socket", get(ws_handler::<P>))
        .route("/health", get(health_handler::<P>));

    #[cfg(feature = "metrics")]
    let app = with_metrics_route(app);

    app.with_state(state)
        .merge(liverelay_web::static_router())
        .layer(TraceLayer::new_for_http())
}

#[cfg(feature = "metrics")]
fn with_metrics_route<S>(app: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    match crate::metrics::install_prometheus_recorder() {
        Ok(handle) => app.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        ),
        Err(e) => {
            tracing::warn!(%e, "Metrics endpoint disabled");
            app
        }
    }
}

/// Serve the gateway on an already-bound listener until Ctrl+C.
pub async fn serve<P: Producer>(
    listener: TcpListener,
    state: Arc<GatewayState<P>>,
) -> anyhow::Result<()> {
    let sweeper = state.spawn_session_sweeper();
    let app = router(state);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.abort();
    result?;
    Ok(())
}

/// Bind the configured address on `port` and serve the gateway.
pub async fn start_gateway<P: Producer>(
    state: Arc<GatewayState<P>>,
    port: u16,
) -> anyhow::Result<()> {
    let addr = format!("{}:{port}", state.config.bind_addr());
    let listener = TcpListener::bind(&addr).await?;
    info!("Gateway listening on http://{addr}/");

    serve(listener, state).await
}

async fn ws_handler<P: Producer>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState<P>>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(state, socket))
}

async fn health_handler<P: Producer>(State(state): State<Arc<GatewayState<P>>>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len(),
    }))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!(%e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
