//! Peer change notifications.
//!
//! The workflow publishes one `PeerEvent` per successful commit. Observers
//! run as their own tasks and never block or fail the commit.

use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::models::mnet_audit_log;
use crate::services::key_fetcher::RemoteKeyCache;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerChange {
    Created,
    Updated,
}

impl PeerChange {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerChange::Created => "created",
            PeerChange::Updated => "updated",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerEvent {
    pub change: PeerChange,
    pub host_id: i32,
    pub wwwroot: String,
    pub actor: String,
    pub deleted: bool,
    pub public_key_changed: bool,
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PeerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: PeerEvent) {
        // No subscribers is fine: nobody is listening yet.
        if let Ok(receivers) = self.sender.send(event) {
            tracing::debug!("peer event delivered to {} observers", receivers);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Persist every peer change into `mnet_audit_log`.
pub fn spawn_audit_logger(db: DatabaseConnection, bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        tracing::info!("Peer audit logger started");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = record_event(&db, &event).await {
                        tracing::error!("Failed to record peer event for #{}: {}", event.host_id, e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Audit logger lagged, {} peer events lost", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn record_event(db: &DatabaseConnection, event: &PeerEvent) -> Result<(), sea_orm::DbErr> {
    let payload = serde_json::to_string(event).ok();
    let entry = mnet_audit_log::ActiveModel {
        host_id: Set(event.host_id),
        wwwroot: Set(event.wwwroot.clone()),
        operation: Set(event.change.as_str().to_string()),
        actor: Set(event.actor.clone()),
        payload: Set(payload),
        created_at: Set(chrono::Utc::now().to_rfc3339()),
        ..Default::default()
    };
    entry.insert(db).await?;
    Ok(())
}

/// Drop cached remote keys for hosts that were just committed.
pub fn spawn_cache_invalidator(cache: RemoteKeyCache, bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => cache.invalidate(&event.wwwroot),
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    tracing::warn!("Key cache invalidator lagged, clearing is not guaranteed");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
