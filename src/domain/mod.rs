//! Domain layer - Pure business abstractions
//!
//! This layer contains NO framework dependencies (no SeaORM, no Axum).
//! Only entity types, trait definitions and domain error types.

pub mod errors;
pub mod peer;
pub mod repositories;

pub use errors::{CredentialIssue, DomainError};
pub use peer::*;
pub use repositories::*;
