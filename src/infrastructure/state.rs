//! Application state containing repositories and shared resources

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::domain::{ApplicationRepository, DomainError, PeerRepository, SettingsRepository};
use crate::infrastructure::config::Config;
use crate::infrastructure::{
    SeaOrmApplicationRepository, SeaOrmPeerRepository, SeaOrmSettingsRepository,
};
use crate::services::events::EventBus;
use crate::services::key_fetcher::{KeyFetcher, RemoteKeyCache, XmlRpcKeyFetcher};
use crate::services::registration::RegistrationService;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    db: DatabaseConnection,
    pub config: Arc<Config>,
    /// Host repository
    pub peer_repo: Arc<dyn PeerRepository>,
    /// Application catalogue
    pub application_repo: Arc<dyn ApplicationRepository>,
    /// mnet settings
    pub settings_repo: Arc<dyn SettingsRepository>,
    pub registration: Arc<RegistrationService>,
    pub key_cache: RemoteKeyCache,
    pub events: EventBus,
}

impl AppState {
    /// Create the state with the XML-RPC key fetcher.
    ///
    /// Fails with `nocurl` when no HTTP client can be built.
    pub fn new(db: DatabaseConnection, config: Config) -> Result<Self, DomainError> {
        let fetcher = Arc::new(XmlRpcKeyFetcher::new(&config)?);
        Ok(Self::with_fetcher(db, config, fetcher))
    }

    /// Create the state around a caller-supplied key fetcher.
    pub fn with_fetcher(
        db: DatabaseConnection,
        config: Config,
        fetcher: Arc<dyn KeyFetcher>,
    ) -> Self {
        let peer_repo: Arc<dyn PeerRepository> = Arc::new(SeaOrmPeerRepository::new(db.clone()));
        let application_repo: Arc<dyn ApplicationRepository> =
            Arc::new(SeaOrmApplicationRepository::new(db.clone()));
        let settings_repo: Arc<dyn SettingsRepository> =
            Arc::new(SeaOrmSettingsRepository::new(db.clone()));
        let key_cache = RemoteKeyCache::default();
        let events = EventBus::new();

        let registration = Arc::new(
            RegistrationService::new(
                peer_repo.clone(),
                application_repo.clone(),
                settings_repo.clone(),
                fetcher,
                key_cache.clone(),
                events.clone(),
            )
            .with_lookup_timeout(config.key_fetch_timeout),
        );

        Self {
            db,
            config: Arc::new(config),
            peer_repo,
            application_repo,
            settings_repo,
            registration,
            key_cache,
            events,
        }
    }

    /// Get the database connection
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

// Allow extracting DatabaseConnection from AppState
impl axum::extract::FromRef<AppState> for DatabaseConnection {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}
