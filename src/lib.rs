pub mod api;
pub mod cli;
pub mod client;
pub mod cookies;
pub mod guard;
pub mod identity;
pub mod jwt;
pub mod pages;
pub mod session;
pub mod state;

use axum::{Router, middleware};
use guard::{GuardSettings, route_guard};
use identity::IdentityClient;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

pub struct ServerConfig {
    /// Base URL of the identity service
    pub identity_url: Url,
    /// Timeout applied to every identity service call
    pub identity_timeout: Duration,
    /// Route guard and cookie settings
    pub guard: GuardSettings,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Result<Router, reqwest::Error> {
    let identity = IdentityClient::new(&config.identity_url, config.identity_timeout)?;
    let state = AppState {
        identity,
        settings: Arc::new(config.guard.clone()),
    };

    let api_router = api::create_api_router(state.clone());

    // The guard wraps everything; API routes classify as bypass.
    Ok(Router::new()
        .nest("/api", api_router)
        .merge(pages::router(state.clone()))
        .layer(middleware::from_fn_with_state(state, route_guard::<AppState>)))
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config).map_err(std::io::Error::other)?;
    axum::serve(listener, app).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
