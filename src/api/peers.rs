//! Peer host administration endpoints.
//!
//! `POST /mnet/peers` carries the classic form fields (`step`, `hostid`,
//! `wwwroot`, ...) url-encoded, plus the `sesskey` issued at login.

use axum::{
    Form, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

use crate::api::error::ApiError;
use crate::domain::{DomainError, HostRef};
use crate::infrastructure::AppState;
use crate::infrastructure::auth::{Claims, verify_session_key};
use crate::services::context::RegistrationContext;
use crate::services::registration::{HostForm, Step, StepOutcome};
use crate::services::strings;

#[derive(Debug, Default, Deserialize)]
pub struct PeerFormSubmission {
    pub sesskey: Option<String>,
    pub step: Option<String>,
    pub id: Option<String>,
    pub hostid: Option<String>,
    pub wwwroot: Option<String>,
    pub name: Option<String>,
    pub deleted: Option<String>,
    pub public_key: Option<String>,
    pub applicationid: Option<String>,
    pub updateregisterall: Option<String>,
    pub registerallhosts: Option<String>,
}

/// Integer form field; anything unparseable counts as absent.
fn int_param(raw: Option<&str>) -> Option<i32> {
    raw.and_then(|v| v.trim().parse::<i32>().ok())
}

fn locale_from(headers: &HeaderMap, fallback: &str) -> String {
    headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|tag| tag.split(';').next().unwrap_or(tag).trim().to_string())
        .filter(|tag| !tag.is_empty() && tag != "*")
        .unwrap_or_else(|| fallback.to_string())
}

fn context_for(state: &AppState, claims: &Claims, headers: &HeaderMap) -> RegistrationContext {
    RegistrationContext::new(
        claims.sub.clone(),
        &claims.role,
        locale_from(headers, &state.config.default_locale),
    )
    .with_policy(state.config.credential_policy())
}

/// The key fetcher must be able to speak XML-RPC before any host work.
fn ensure_environment(state: &AppState) -> Result<(), DomainError> {
    if !state.registration.fetcher().speaks_xmlrpc() {
        return Err(DomainError::Precondition("xmlrpc-missing"));
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/api/mnet/peers",
    responses(
        (status = 200, description = "Active peers, applications and the register-all flag"),
        (status = 403, description = "Missing site:config capability")
    )
)]
pub async fn list_hosts(
    State(state): State<AppState>,
    claims: Claims,
    headers: HeaderMap,
) -> Response {
    let ctx = context_for(&state, &claims, &headers);

    match state.registration.list_hosts(&ctx).await {
        Ok(directory) => (
            StatusCode::OK,
            Json(json!({
                "hosts": directory.hosts,
                "applications": directory.applications,
                "register_all_hosts": directory.register_all_hosts,
                "sesskey": crate::infrastructure::auth::session_key(&claims),
            })),
        )
            .into_response(),
        Err(e) => ApiError::new(e, &ctx.locale).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/mnet/peers/{id}",
    params(("id" = i32, Path, description = "Host id")),
    responses(
        (status = 200, description = "Stored host, credentials and key drift"),
        (status = 404, description = "Unknown host")
    )
)]
pub async fn review_host(
    State(state): State<AppState>,
    claims: Claims,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> Response {
    let ctx = context_for(&state, &claims, &headers);

    if let Err(e) = ensure_environment(&state) {
        return ApiError::new(e, &ctx.locale).into_response();
    }

    match state.registration.review_host(&ctx, HostRef::Id(id)).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => ApiError::new(e, &ctx.locale).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/mnet/peers",
    request_body(
        content = String,
        content_type = "application/x-www-form-urlencoded",
        description = "Host form"
    ),
    responses(
        (status = 200, description = "Review of the candidate host or commit acknowledgement"),
        (status = 400, description = "Invalid URL, key or action"),
        (status = 403, description = "Bad session key or missing capability"),
        (status = 409, description = "Host already exists")
    )
)]
pub async fn submit_host(
    State(state): State<AppState>,
    claims: Claims,
    headers: HeaderMap,
    Form(form): Form<PeerFormSubmission>,
) -> Response {
    let ctx = context_for(&state, &claims, &headers);

    let sesskey_ok = form
        .sesskey
        .as_deref()
        .is_some_and(|key| verify_session_key(&claims, key));
    if !sesskey_ok {
        tracing::warn!("Rejected peer form from {}: bad sesskey", claims.sub);
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "invalidsesskey",
                "detail": strings::get(&ctx.locale, "invalidsesskey"),
            })),
        )
            .into_response();
    }

    if let Err(e) = ensure_environment(&state) {
        return ApiError::new(e, &ctx.locale).into_response();
    }

    if form.updateregisterall.as_deref().is_some_and(|v| !v.is_empty()) {
        let enabled = form.registerallhosts.as_deref().is_some_and(|v| !v.is_empty() && v != "0");
        return match state.registration.set_register_all_hosts(&ctx, enabled).await {
            Ok(()) => (
                StatusCode::OK,
                Json(json!({
                    "message": strings::get(&ctx.locale, "changessaved"),
                    "register_all_hosts": enabled,
                    "redirect": "/api/mnet/peers",
                })),
            )
                .into_response(),
            Err(e) => ApiError::new(e, &ctx.locale).into_response(),
        };
    }

    let Some(step) = form.step.as_deref().and_then(Step::parse) else {
        return ApiError::new(
            DomainError::validation("invalidaction", "step must be input or commit"),
            &ctx.locale,
        )
        .into_response();
    };

    let host_form = HostForm {
        id: int_param(form.id.as_deref()).or_else(|| int_param(form.hostid.as_deref())),
        wwwroot: form.wwwroot,
        name: form.name,
        deleted: form.deleted,
        public_key: form.public_key,
        application_id: int_param(form.applicationid.as_deref()),
    };

    match state.registration.process_step(&ctx, step, host_form).await {
        Ok(StepOutcome::Committed { host_id, change }) => (
            StatusCode::OK,
            Json(json!({
                "hostid": host_id,
                "change": change,
                "message": strings::get(&ctx.locale, "changessaved"),
                "redirect": format!("/api/mnet/peers/{}", host_id),
            })),
        )
            .into_response(),
        Ok(review @ StepOutcome::Review(_)) => (StatusCode::OK, Json(review)).into_response(),
        Err(e) => ApiError::new(e, &ctx.locale).into_response(),
    }
}
