//! Repository implementations using SeaORM

pub mod application_repository;
pub mod peer_repository;
pub mod settings_repository;

pub use application_repository::SeaOrmApplicationRepository;
pub use peer_repository::SeaOrmPeerRepository;
pub use settings_repository::SeaOrmSettingsRepository;
