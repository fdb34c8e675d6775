//! SeaORM implementation of SettingsRepository

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait, Set, sea_query::OnConflict};

use crate::domain::{DomainError, SettingsRepository};
use crate::models::mnet_config::{self, Entity as ConfigEntity};

pub struct SeaOrmSettingsRepository {
    db: DatabaseConnection,
}

impl SeaOrmSettingsRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SettingsRepository for SeaOrmSettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
        let row = ConfigEntity::find_by_id(key.to_owned())
            .one(&self.db)
            .await?;
        Ok(row.map(|r| r.value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DomainError> {
        let row = mnet_config::ActiveModel {
            name: Set(key.to_owned()),
            value: Set(value.to_owned()),
        };

        ConfigEntity::insert(row)
            .on_conflict(
                OnConflict::column(mnet_config::Column::Name)
                    .update_column(mnet_config::Column::Value)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }
}
