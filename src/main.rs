// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::connection_manager::ConnectionManager;
use crate::application::ingest_service::IngestService;
use crate::application::view_controller::ViewController;
use crate::infrastructure::config::load_settings;
use crate::infrastructure::mqtt_client::MqttConnector;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    connection_status, get_track, get_view, health_check, list_message_detail, list_messages,
    list_tracks, publish, stream_view, update_connection,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let settings = load_settings()?;

    // Broker connection (infrastructure + application layer)
    let connector = Arc::new(MqttConnector::new(settings.broker.backoff_policy()));
    let mut connection = ConnectionManager::new(
        connector,
        settings.broker.connection_options(),
        settings.buffer.capacity,
    );
    let events = connection.open().await?;

    let view = ViewController::new(settings.view.view_options());
    connection.subscribe(view.topic()).await;

    let connection = Arc::new(Mutex::new(connection));
    let view = Arc::new(RwLock::new(view));

    // The pump owns the event stream; the control handle follows reconfigures
    let (ingest, sessions) = IngestService::new(connection.clone(), view.clone());
    let ingest_task = tokio::spawn(ingest.run(events));

    let state = Arc::new(AppState {
        connection,
        view,
        sessions,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/view", get(get_view))
        .route("/view/stream", get(stream_view))
        .route("/tracks", get(list_tracks))
        .route("/tracks/:name", get(get_track))
        .route("/connection", get(connection_status).put(update_connection))
        .route("/messages", get(list_messages))
        .route("/messages/detail", get(list_message_detail))
        .route("/publish", post(publish))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // Start server
    let addr: SocketAddr = settings
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid server.bind address {:?}", settings.server.bind))?;
    tracing::info!("Starting drone-livemap on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The connection lives exactly as long as the server
    state.connection.lock().await.close().await;
    if let Err(e) = ingest_task.await {
        tracing::warn!("Ingest task ended abnormally: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
