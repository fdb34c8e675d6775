//! SeaORM implementation of PeerRepository

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, SqlErr,
};

use crate::domain::{DomainError, HostId, PeerListing, PeerRecord, PeerRepository};
use crate::models::mnet_application::Entity as ApplicationEntity;
use crate::models::mnet_host::{self, ActiveModel, Entity as HostEntity};

/// SeaORM-based implementation of PeerRepository
pub struct SeaOrmPeerRepository {
    db: DatabaseConnection,
}

impl SeaOrmPeerRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn active_id_for(&self, wwwroot: &str) -> Option<i32> {
        HostEntity::find()
            .filter(mnet_host::Column::Wwwroot.eq(wwwroot))
            .filter(mnet_host::Column::Deleted.eq(false))
            .one(&self.db)
            .await
            .ok()
            .flatten()
            .map(|h| h.id)
    }

    /// Unique-index violations mean another active host owns the wwwroot.
    async fn map_write_error(&self, e: DbErr, wwwroot: &str) -> DomainError {
        if let Some(SqlErr::UniqueConstraintViolation(_)) = e.sql_err() {
            if let Some(id) = self.active_id_for(wwwroot).await {
                return DomainError::DuplicateHost(id);
            }
        }
        DomainError::from(e)
    }
}

fn to_record(model: mnet_host::Model) -> PeerRecord {
    PeerRecord {
        id: HostId::Saved(model.id),
        wwwroot: model.wwwroot,
        name: model.name,
        application_id: model.applicationid,
        public_key: model.public_key,
        public_key_expires: model.public_key_expires,
        deleted: model.deleted,
        ip_address: model.ip_address,
        portno: model.portno,
        last_connect_time: model.last_connect_time,
        created_at: Some(model.created_at),
        updated_at: Some(model.updated_at),
    }
}

#[async_trait]
impl PeerRepository for SeaOrmPeerRepository {
    async fn find_by_id(&self, id: i32) -> Result<Option<PeerRecord>, DomainError> {
        let host = HostEntity::find_by_id(id).one(&self.db).await?;
        Ok(host.map(to_record))
    }

    async fn find_by_wwwroot(&self, wwwroot: &str) -> Result<Option<PeerRecord>, DomainError> {
        // deleted = 0 sorts first, then the most recently touched row
        let host = HostEntity::find()
            .filter(mnet_host::Column::Wwwroot.eq(wwwroot))
            .order_by_asc(mnet_host::Column::Deleted)
            .order_by_desc(mnet_host::Column::UpdatedAt)
            .one(&self.db)
            .await?;
        Ok(host.map(to_record))
    }

    async fn list_active(
        &self,
        excluding_id: Option<i32>,
    ) -> Result<Vec<PeerListing>, DomainError> {
        let mut query = HostEntity::find()
            .filter(mnet_host::Column::Deleted.eq(false))
            .find_also_related(ApplicationEntity)
            .order_by_asc(mnet_host::Column::Name);

        if let Some(id) = excluding_id {
            query = query.filter(mnet_host::Column::Id.ne(id));
        }

        let rows = query.all(&self.db).await?;

        Ok(rows
            .into_iter()
            .filter_map(|(host, app)| {
                // Inner join semantics: hosts without an application are skipped
                let app = app?;
                Some(PeerListing {
                    id: host.id,
                    wwwroot: host.wwwroot,
                    ip_address: host.ip_address,
                    name: host.name,
                    public_key: host.public_key,
                    public_key_expires: host.public_key_expires,
                    portno: host.portno,
                    last_connect_time: host.last_connect_time,
                    application_id: host.applicationid,
                    app_name: app.name,
                    app_display_name: app.display_name,
                    xmlrpc_server_url: app.xmlrpc_server_url,
                })
            })
            .collect())
    }

    async fn insert(&self, record: &PeerRecord) -> Result<i32, DomainError> {
        let now = chrono::Utc::now().to_rfc3339();

        let host = ActiveModel {
            deleted: Set(record.deleted),
            wwwroot: Set(record.wwwroot.clone()),
            ip_address: Set(record.ip_address.clone()),
            name: Set(record.name.clone()),
            public_key: Set(record.public_key.clone()),
            public_key_expires: Set(record.public_key_expires),
            portno: Set(record.portno),
            last_connect_time: Set(record.last_connect_time),
            applicationid: Set(record.application_id),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        };

        match host.insert(&self.db).await {
            Ok(saved) => Ok(saved.id),
            Err(e) => Err(self.map_write_error(e, &record.wwwroot).await),
        }
    }

    async fn update(&self, record: &PeerRecord) -> Result<(), DomainError> {
        let Some(id) = record.id.get() else {
            return Err(DomainError::Persistence(
                "cannot update a host that was never saved".to_string(),
            ));
        };

        let existing = HostEntity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(DomainError::NotFound)?;

        let mut host: ActiveModel = existing.into();
        host.deleted = Set(record.deleted);
        host.wwwroot = Set(record.wwwroot.clone());
        host.ip_address = Set(record.ip_address.clone());
        host.name = Set(record.name.clone());
        host.public_key = Set(record.public_key.clone());
        host.public_key_expires = Set(record.public_key_expires);
        host.portno = Set(record.portno);
        host.last_connect_time = Set(record.last_connect_time);
        host.applicationid = Set(record.application_id);
        host.updated_at = Set(chrono::Utc::now().to_rfc3339());

        match host.update(&self.db).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.map_write_error(e, &record.wwwroot).await),
        }
    }
}
