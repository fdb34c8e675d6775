//! SeaORM implementation of ApplicationRepository

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder};

use crate::domain::{Application, ApplicationRepository, DomainError};
use crate::models::mnet_application::{self, Entity as ApplicationEntity};

pub struct SeaOrmApplicationRepository {
    db: DatabaseConnection,
}

impl SeaOrmApplicationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

impl From<mnet_application::Model> for Application {
    fn from(model: mnet_application::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            display_name: model.display_name,
            xmlrpc_server_url: model.xmlrpc_server_url,
        }
    }
}

#[async_trait]
impl ApplicationRepository for SeaOrmApplicationRepository {
    async fn find_by_id(&self, id: i32) -> Result<Option<Application>, DomainError> {
        let app = ApplicationEntity::find_by_id(id).one(&self.db).await?;
        Ok(app.map(Application::from))
    }

    async fn find_all(&self) -> Result<Vec<Application>, DomainError> {
        let apps = ApplicationEntity::find()
            .order_by_asc(mnet_application::Column::Id)
            .all(&self.db)
            .await?;
        Ok(apps.into_iter().map(Application::from).collect())
    }
}
