//! Hubsync Server - Main entry point
//!
//! GitHub tool proxy with atomic directory sync.

use anyhow::{Context, Result};
use clap::Parser;
use hubsync_server::{
    api, config::Config, daemon::shutdown::ShutdownCoordinator, github::auth::AuthManager,
    github::client::GitHubClient, utils,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, config.log.file.as_deref())?;

    tracing::info!("Starting hubsync-server v{}", env!("CARGO_PKG_VERSION"));

    let auth = AuthManager::from_sources(
        std::env::var("GITHUB_PAT").ok(),
        config.auth.credentials_file.as_deref(),
    );
    if auth.is_empty() {
        tracing::warn!("No GitHub identity configured; add one via POST /auth/pat");
    }

    let client = GitHubClient::new(&config.github, auth.clone())
        .context("failed to build GitHub client")?;

    let shutdown_coordinator = ShutdownCoordinator::new();
    let host = config.server.host.clone();
    let port = config.server.port;

    let state = api::AppState::new(config, auth, Arc::new(client), shutdown_coordinator.token())
        .context("failed to build tool registry")?;
    let tracker = state.tracker().clone();
    let app = api::create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", host, port))?;

    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Health endpoint: http://{}/health", addr);
    tracing::info!("SSE endpoint: http://{}/sse", addr);
    tracing::info!("JSON-RPC endpoint: http://{}/messages", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let token = shutdown_coordinator.token();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        token.cancelled_owned().await;
    });
    let server_handle = tokio::spawn(async move { server.await });

    shutdown_coordinator.wait_for_signal().await;
    shutdown_coordinator.shutdown(&tracker).await;

    // Wait for server to finish (with timeout)
    match tokio::time::timeout(std::time::Duration::from_secs(5), server_handle).await {
        Ok(Ok(Ok(()))) => tracing::info!("Server shutdown complete"),
        Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
        Ok(Err(e)) => tracing::error!("Server task panicked: {}", e),
        Err(_) => tracing::warn!("Server shutdown timeout, forcing exit"),
    }

    Ok(())
}
