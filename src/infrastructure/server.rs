// Server module - Provides reusable HTTP server functionality
// Used by main.rs and by the integration tests

use axum::http::HeaderValue;
use axum::{Json, Router, routing::get};
use std::net::{SocketAddr, TcpListener};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::api;
use crate::api_docs::ApiDoc;
use crate::infrastructure::AppState;
use crate::services::events::{spawn_audit_logger, spawn_cache_invalidator};

/// Build the full router: API, OpenAPI document, tracing and CORS
pub fn build_router(state: AppState) -> Router {
    let mut origins = Vec::new();
    for origin in &state.config.cors_allowed_origins {
        match origin.parse::<HeaderValue>() {
            Ok(v) => origins.push(v),
            Err(e) => tracing::error!("Failed to parse CORS origin '{}': {}", origin, e),
        }
    }

    let cors = if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/api", api::api_router(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Start the observers that react to committed peer changes
pub fn spawn_observers(state: &AppState) -> Vec<JoinHandle<()>> {
    vec![
        spawn_audit_logger(state.db().clone(), &state.events),
        spawn_cache_invalidator(state.key_cache.clone(), &state.events),
    ]
}

/// Find an available port starting from the preferred port on a specific IP
pub fn find_available_port_on_ip(preferred_port: u16, ip: &str) -> Option<u16> {
    // Try preferred port first
    if TcpListener::bind((ip, preferred_port)).is_ok() {
        return Some(preferred_port);
    }

    // Scan next 100 ports
    (preferred_port.saturating_add(1)..preferred_port.saturating_add(100))
        .find(|&port| TcpListener::bind((ip, port)).is_ok())
}

/// Serve the router until the process stops
pub async fn serve(state: AppState, preferred_port: u16) -> Result<(), String> {
    let port = find_available_port_on_ip(preferred_port, "0.0.0.0")
        .ok_or_else(|| format!("No free port near {}", preferred_port))?;

    if port != preferred_port {
        tracing::warn!(
            "Preferred port {} was not available, using port {} instead",
            preferred_port,
            port
        );
    }

    let _observers = spawn_observers(&state);
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    tracing::info!("mnet peer registry listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("HTTP server error: {}", e))
}
