//! Domain error types
//!
//! These errors are framework-agnostic and represent business-level failures.
//! Every variant maps to a machine-readable code that the HTTP layer hands
//! back to the operator.

use std::fmt;

use serde::Serialize;

/// One itemized problem reported by the credential validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialIssue {
    pub code: u16,
    pub message: String,
}

#[derive(Debug)]
pub enum DomainError {
    /// Malformed user input (bad URL, empty key, unknown application)
    Validation { code: &'static str, detail: String },
    /// An active host already owns this wwwroot
    DuplicateHost(i32),
    /// The submitted certificate was rejected
    CredentialFailure {
        host_id: Option<i32>,
        issues: Vec<CredentialIssue>,
    },
    /// Remote host could not be reached or answered garbage
    Network(String),
    /// Database/persistence error
    Persistence(String),
    /// Resource not found
    NotFound,
    /// Caller lacks a required capability
    PermissionDenied(String),
    /// The host environment is missing a required facility
    Precondition(&'static str),
}

impl DomainError {
    pub fn validation(code: &'static str, detail: impl Into<String>) -> Self {
        DomainError::Validation {
            code,
            detail: detail.into(),
        }
    }

    /// Machine-readable code surfaced at the boundary.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation { code, .. } => *code,
            DomainError::DuplicateHost(_) => "hostexists",
            DomainError::CredentialFailure { .. } => "invalidpubkey",
            DomainError::Network(_) => "networkerror",
            DomainError::Persistence(_) => "invalidaction",
            DomainError::NotFound => "unknownhost",
            DomainError::PermissionDenied(_) => "nopermissions",
            DomainError::Precondition(code) => *code,
        }
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::Validation { code, detail } => {
                write!(f, "Validation error ({}): {}", code, detail)
            }
            DomainError::DuplicateHost(id) => write!(f, "Host already exists with id {}", id),
            DomainError::CredentialFailure { issues, .. } => {
                write!(f, "Invalid public key")?;
                for issue in issues {
                    write!(f, "; {}: {}", issue.code, issue.message)?;
                }
                Ok(())
            }
            DomainError::Network(msg) => write!(f, "Network error: {}", msg),
            DomainError::Persistence(msg) => write!(f, "Database error: {}", msg),
            DomainError::NotFound => write!(f, "Resource not found"),
            DomainError::PermissionDenied(cap) => write!(f, "Missing capability: {}", cap),
            DomainError::Precondition(code) => write!(f, "Environment precondition failed: {}", code),
        }
    }
}

impl std::error::Error for DomainError {}

// Conversion from SeaORM errors (used in infrastructure layer)
impl From<sea_orm::DbErr> for DomainError {
    fn from(e: sea_orm::DbErr) -> Self {
        DomainError::Persistence(e.to_string())
    }
}
