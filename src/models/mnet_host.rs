use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "mnet_host")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(default_value = "false")]
    pub deleted: bool,
    /// Unique among non-deleted rows (partial index, see db.rs)
    pub wwwroot: String,
    pub ip_address: Option<String>,
    pub name: String,
    pub public_key: Option<String>,
    pub public_key_expires: Option<i64>,
    pub portno: i32,
    pub last_connect_time: Option<i64>,
    pub applicationid: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::mnet_application::Entity",
        from = "Column::Applicationid",
        to = "super::mnet_application::Column::Id"
    )]
    Application,
}

impl Related<super::mnet_application::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Application.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
