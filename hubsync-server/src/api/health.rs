//! Status endpoints.

use axum::{extract::State, response::Html, response::IntoResponse, Json};
use serde_json::json;

use super::{AppState, SERVICE_NAME};

/// GET / - Human-readable status page
pub async fn index() -> impl IntoResponse {
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{name}</title></head>\n<body>\n\
         <h1>{name} v{version}</h1>\n\
         <p>JSON-RPC endpoint: <code>POST /messages</code></p>\n\
         <p>Event stream: <code>GET /sse</code></p>\n\
         <p>Health: <a href=\"/health\">/health</a></p>\n\
         </body>\n</html>\n",
        name = SERVICE_NAME,
        version = env!("CARGO_PKG_VERSION"),
    ))
}

/// GET /health - Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let identity = state.auth.active().await;
    let tracker = state.tools.tracker();

    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "auth_status": {
            "active": identity.as_ref().map(|i| i.id.clone()),
            "type": identity.as_ref().map(|i| i.kind),
            "rate_limit_remaining": identity.as_ref().and_then(|i| i.rate_limit_remaining()),
        },
        "operations": {
            "tracked": tracker.len().await,
            "active": tracker.active_count().await,
        },
    }))
}
