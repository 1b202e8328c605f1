//! HTTP entry points that open a session and return its initial payload.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use liverelay_core::{Params, Producer, RelayError, Result, SessionId};

use crate::state::GatewayState;

/// Initial payload for non-browser clients.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
    pub data: serde_json::Value,
}

/// Register a session, run the producer, and return the id with its result.
///
/// If the producer fails the session is removed before anything is exposed.
pub fn open_session<P: Producer>(
    state: &GatewayState<P>,
    params: &Params,
) -> Result<SessionResponse> {
    let (session_id, events) = state.sessions.create();
    #[cfg(feature = "metrics")]
    crate::metrics::record_session_created();

    let data = state
        .producer
        .produce(params, events)
        .map_err(producer_error)
        .and_then(|output| serde_json::to_value(&output).map_err(RelayError::from));

    match data {
        Ok(data) => {
            info!(session_id = %session_id, params = params.len(), "Session opened");
            Ok(SessionResponse { session_id, data })
        }
        Err(e) => {
            state.sessions.remove(&session_id);
            warn!(session_id = %session_id, kind = e.kind(), %e, "Producer failed");
            #[cfg(feature = "metrics")]
            crate::metrics::record_error(e.kind());
            Err(e)
        }
    }
}

/// Keep a parameter error recognisable; fold anything else into `Producer`.
fn producer_error(err: anyhow::Error) -> RelayError {
    match err.downcast::<RelayError>() {
        Ok(e @ RelayError::InvalidParam { .. }) => e,
        Ok(e) => RelayError::Producer(e.to_string()),
        Err(e) => RelayError::Producer(format!("{e:#}")),
    }
}

fn error_status(err: &RelayError) -> StatusCode {
    match err {
        RelayError::InvalidParam { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `GET /`: render the page with the initial result and session id embedded.
pub async fn page_handler<P: Producer>(
    State(state): State<Arc<GatewayState<P>>>,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    let session = match open_session(&state, &query.into_iter().collect()) {
        Ok(session) => session,
        Err(e) => return (error_status(&e), format!("ERROR {e}")).into_response(),
    };

    match liverelay_web::render_page(&session.data, &session.session_id.to_string()) {
        Some(page) => Html(page).into_response(),
        None => {
            state.sessions.remove(&session.session_id);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ERROR page template missing".to_string(),
            )
                .into_response()
        }
    }
}

/// `GET /api/session`: same as `/` but answers with JSON.
pub async fn session_handler<P: Producer>(
    State(state): State<Arc<GatewayState<P>>>,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    match open_session(&state, &query.into_iter().collect()) {
        Ok(session) => Json(session).into_response(),
        Err(e) => (
            error_status(&e),
            Json(json!({ "error": e.to_string(), "kind": e.kind() })),
        )
            .into_response(),
    }
}
