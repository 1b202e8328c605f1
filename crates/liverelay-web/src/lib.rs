//! Page shell and static assets, embedded into the binary.
//!
//! Uses `rust-embed` to bake the `ui/` directory into the binary.
//! In debug mode (`debug-embed` feature), files are read from disk
//! so you can edit JS/CSS and just refresh the browser.

use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use rust_embed::Embed;
use tracing::warn;

#[derive(Embed)]
#[folder = "ui/"]
struct UiAssets;

const PAGE_SHELL: &str = "page.html";
const PAGE_BODY: &str = "index.html";

/// Build an axum `Router` that serves the embedded assets (`/script.js`, ...).
///
/// The page itself is rendered per request by the gateway, so `/` is not
/// part of this router.
pub fn static_router() -> Router {
    Router::new().route("/{*path}", get(static_handler))
}

async fn static_handler(Path(path): Path<String>) -> Response {
    match UiAssets::get(&path) {
        Some(asset) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.as_ref())],
                asset.data.into_owned(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, Html("<h1>404</h1>")).into_response(),
    }
}

fn asset_text(path: &str) -> Option<String> {
    let asset = UiAssets::get(path)?;
    match String::from_utf8(asset.data.into_owned()) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(path, %e, "Embedded asset is not UTF-8");
            None
        }
    }
}

/// Render the initial page for a session.
///
/// `data` is embedded as a JavaScript string literal holding its JSON text,
/// and `session_id` is what the page script sends as its first socket message.
/// Returns `None` when the page shell is missing from the embedded assets.
pub fn render_page(data: &serde_json::Value, session_id: &str) -> Option<String> {
    let shell = asset_text(PAGE_SHELL)?;
    let body = asset_text(PAGE_BODY).unwrap_or_default();

    Some(
        shell
            .replace("{{BODY}}", &body)
            .replace("{{DATA}}", &script_string_literal(&data.to_string()))
            .replace("{{SESSION_ID}}", session_id),
    )
}

/// Quote `text` as a JS string literal that is safe inside a `<script>` block.
fn script_string_literal(text: &str) -> String {
    serde_json::Value::String(text.to_string())
        .to_string()
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
}
