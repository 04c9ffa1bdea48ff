//! HTTP API module for the hubsync server.

pub mod auth;
pub mod error;
pub mod health;
pub mod rpc;
pub mod sse;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::executor::{BatchExecutor, OperationTracker};
use crate::github::{auth::AuthManager, UpstreamApi};
use crate::tools::{ToolContext, ToolError, ToolRegistry};

pub const SERVICE_NAME: &str = "hubsync-server";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: AuthManager,
    pub registry: Arc<ToolRegistry>,
    pub tools: ToolContext,
    pub tool_permits: Arc<Semaphore>,
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the tracker, executor and tool registry around one upstream.
    pub fn new(
        config: Config,
        auth: AuthManager,
        api: Arc<dyn UpstreamApi>,
        shutdown: CancellationToken,
    ) -> Result<Self, ToolError> {
        let tracker = OperationTracker::from_config(&config.tracker);
        let executor = BatchExecutor::new(api, tracker, config.sync.clone());
        let tools = ToolContext::new(executor, config.sync.clone());
        let registry = ToolRegistry::new()?;

        Ok(Self {
            tool_permits: Arc::new(Semaphore::new(config.tools.max_concurrent.max(1))),
            config: Arc::new(config),
            auth,
            registry: Arc::new(registry),
            tools,
            shutdown,
            started_at: Instant::now(),
        })
    }

    pub fn tracker(&self) -> &OperationTracker {
        self.tools.tracker()
    }
}

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::index))
        .route("/health", get(health::health))
        // MCP transport
        .route("/sse", get(sse::sse))
        .route("/messages", post(rpc::messages))
        // Identity management
        .route("/auth/pat", post(auth::add_pat))
        .route("/auth/app", post(auth::add_app))
        .route("/auth/switch", post(auth::switch))
        .route("/auth/remove", post(auth::remove))
        .route("/auth/identities", get(auth::list))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
