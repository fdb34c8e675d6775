//! Repository trait definitions
//!
//! These traits define the contract for data access.
//! Implementations live in the infrastructure layer.

use async_trait::async_trait;

use super::DomainError;
use super::peer::{Application, PeerListing, PeerRecord};

/// Repository trait for mnet host records
#[async_trait]
pub trait PeerRepository: Send + Sync {
    /// Find a host by ID, deleted or not
    async fn find_by_id(&self, id: i32) -> Result<Option<PeerRecord>, DomainError>;

    /// Find a host by its normalized wwwroot.
    /// An active record wins over deleted ones; among deleted ones the most recent.
    async fn find_by_wwwroot(&self, wwwroot: &str) -> Result<Option<PeerRecord>, DomainError>;

    /// List active hosts joined with their application, skipping one id
    async fn list_active(&self, excluding_id: Option<i32>)
    -> Result<Vec<PeerListing>, DomainError>;

    /// Insert a new host and return its id
    async fn insert(&self, record: &PeerRecord) -> Result<i32, DomainError>;

    /// Update an existing host
    async fn update(&self, record: &PeerRecord) -> Result<(), DomainError>;
}

/// Repository trait for the application catalogue
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn find_by_id(&self, id: i32) -> Result<Option<Application>, DomainError>;

    async fn find_all(&self) -> Result<Vec<Application>, DomainError>;
}

/// Repository trait for mnet settings (key/value)
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), DomainError>;
}
