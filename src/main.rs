mod error;
mod handlers;
mod models;
mod service;
mod simulator;
mod state;
mod store;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::service::DeviceService;
use crate::state::{AppState, Config};
use crate::store::{MemoryStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("netsim=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    info!("Starting with {:?}", config);

    let store: Arc<dyn Store> = match &config.data_file {
        Some(path) => Arc::new(
            MemoryStore::open(path)
                .with_context(|| format!("failed to open data file {}", path.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };
    let devices = DeviceService::new(store, config.seed);
    let state = Arc::new(AppState::new(devices));

    let app = app(state, config.static_dir.as_deref());

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the HTTP application: the JSON API under `/api/v1`, a health
/// check, and optionally a static front end for every other path.
fn app(state: Arc<AppState>, static_dir: Option<&Path>) -> Router {
    let api = Router::new()
        .route(
            "/routers",
            post(handlers::create_router).get(handlers::list_routers),
        )
        .route("/routers/{id}", get(handlers::get_router))
        .route("/routers/ip/{ip}", get(handlers::get_router_by_ip))
        .route("/routers/connect", post(handlers::connect_router))
        .route(
            "/routers/configure",
            post(handlers::configure_router).patch(handlers::configure_router),
        )
        .route("/routers/connection", post(handlers::create_connection))
        .route("/routers/connections", get(handlers::list_connections))
        .route("/routers/connections/{id}", get(handlers::get_connection))
        .route(
            "/routers/connections/by-ip",
            get(handlers::connections_by_ip),
        )
        .route(
            "/ports/configure",
            post(handlers::configure_port).patch(handlers::configure_port),
        )
        .route("/packet", post(handlers::send_packet));

    let mut app = Router::new()
        .nest("/api/v1", api)
        .route("/health", get(handlers::health))
        .with_state(state);

    if let Some(dir) = static_dir {
        info!("Serving static files from {}", dir.display());
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
