pub mod auth;
pub mod error;
pub mod health;
pub mod peers;

use axum::{
    routing::{get, post},
    Router,
};

use crate::infrastructure::AppState;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Auth
        .route("/auth/login", post(auth::login))
        // mnet peers
        .route(
            "/mnet/peers",
            get(peers::list_hosts).post(peers::submit_host),
        )
        .route("/mnet/peers/:id", get(peers::review_host))
        .with_state(state)
}
