use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::domain::DomainError;
use crate::services::strings;

/// A domain error rendered for the operator in their language
pub struct ApiError {
    pub error: DomainError,
    pub locale: String,
}

impl ApiError {
    pub fn new(error: DomainError, locale: &str) -> Self {
        Self {
            error,
            locale: locale.to_string(),
        }
    }
}

fn status_for(error: &DomainError) -> StatusCode {
    match error {
        DomainError::Validation { .. } | DomainError::CredentialFailure { .. } => {
            StatusCode::BAD_REQUEST
        }
        DomainError::DuplicateHost(_) => StatusCode::CONFLICT,
        DomainError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        DomainError::NotFound => StatusCode::NOT_FOUND,
        DomainError::Network(_) => StatusCode::BAD_GATEWAY,
        DomainError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        DomainError::Precondition(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error.code();
        let label = strings::get(&self.locale, code);

        let body = match &self.error {
            DomainError::DuplicateHost(id) => json!({
                "error": code,
                "detail": format!("{}: {}", label, id),
                "hostid": id,
            }),
            DomainError::CredentialFailure { host_id, issues } => json!({
                "error": code,
                "detail": label,
                "hostid": host_id,
                "issues": issues,
            }),
            DomainError::Validation { detail, .. } => json!({
                "error": code,
                "detail": format!("{}: {}", label, detail),
            }),
            // Store internals stay in the logs
            DomainError::Persistence(_) => json!({
                "error": code,
                "detail": label,
            }),
            other => json!({
                "error": code,
                "detail": format!("{}: {}", label, other),
            }),
        };

        (status_for(&self.error), Json(body)).into_response()
    }
}
