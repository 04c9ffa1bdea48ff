//! Server-sent event stream announcing where clients post JSON-RPC messages.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::AppState;

/// GET /sse - Emit the `endpoint` event, then keep-alive comments until shutdown
pub async fn sse(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = Uuid::new_v4();
    info!("SSE client connected (session {})", session_id);

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?session_id={}", session_id));

    let events = stream::once(async move { Ok::<_, Infallible>(endpoint) })
        .chain(stream::pending())
        .take_until(state.shutdown.clone().cancelled_owned());

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.config.server.sse_keepalive_secs.max(1)))
            .text("keepalive"),
    )
}
