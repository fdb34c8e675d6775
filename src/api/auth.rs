use crate::infrastructure::auth::{create_jwt, decode_jwt, session_key, verify_password};
use crate::infrastructure::AppState;
use crate::models::user;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    token: String,
    /// Must be echoed back as `sesskey` on every form submission
    sesskey: String,
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    responses(
        (status = 200, description = "Bearer token and session key"),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> impl IntoResponse {
    tracing::info!("Login attempt for user: {}", payload.username);

    let user = match user::Entity::find()
        .filter(user::Column::Username.eq(&payload.username))
        .one(state.db())
        .await
    {
        Ok(Some(u)) => u,
        _ => {
            tracing::warn!("User not found: {}", payload.username);
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalidlogin" })),
            )
                .into_response();
        }
    };

    match verify_password(&payload.password, &user.password_hash) {
        Ok(true) => {
            let token = match create_jwt(&user.username, &user.role) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("Failed to issue token: {}", e);
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "error": "invalidaction" })),
                    )
                        .into_response();
                }
            };
            let claims = match decode_jwt(&token) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Freshly issued token does not decode: {}", e);
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "error": "invalidaction" })),
                    )
                        .into_response();
                }
            };
            tracing::info!("User {} logged in", user.username);
            (
                StatusCode::OK,
                Json(LoginResponse {
                    sesskey: session_key(&claims),
                    token,
                }),
            )
                .into_response()
        }
        _ => {
            tracing::warn!("Password verification failed for user: {}", user.username);
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalidlogin" })),
            )
                .into_response()
        }
    }
}
