use crate::domain::settings;
use crate::infrastructure::auth::hash_password;
use crate::infrastructure::config::Config;
use crate::models::{mnet_config, mnet_host, user};
use sea_orm::*;

/// Make sure the local site and the "All Hosts" pseudo-host exist and that
/// their ids are recorded in the mnet settings.
pub async fn seed_mnet_environment(db: &DatabaseConnection, config: &Config) -> Result<(), DbErr> {
    ensure_special_host(
        db,
        settings::LOCALHOST_ID,
        &config.site_wwwroot,
        "Local site",
        config.local_public_key.clone(),
    )
    .await?;
    ensure_special_host(db, settings::ALL_HOSTS_ID, "", "All Hosts", None).await?;

    if let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password) {
        seed_admin(db, username, password).await?;
    }

    Ok(())
}

async fn ensure_special_host(
    db: &DatabaseConnection,
    setting: &str,
    wwwroot: &str,
    name: &str,
    public_key: Option<String>,
) -> Result<(), DbErr> {
    let recorded = mnet_config::Entity::find_by_id(setting.to_owned())
        .one(db)
        .await?
        .and_then(|row| row.value.parse::<i32>().ok());

    if let Some(id) = recorded {
        if mnet_host::Entity::find_by_id(id).one(db).await?.is_some() {
            return Ok(());
        }
    }

    let now = chrono::Utc::now().to_rfc3339();
    let host = mnet_host::ActiveModel {
        deleted: Set(false),
        wwwroot: Set(wwwroot.to_owned()),
        name: Set(name.to_owned()),
        public_key: Set(public_key),
        portno: Set(0),
        applicationid: Set(1),
        created_at: Set(now.clone()),
        updated_at: Set(now),
        ..Default::default()
    };
    let id = mnet_host::Entity::insert(host).exec(db).await?.last_insert_id;

    mnet_config::Entity::insert(mnet_config::ActiveModel {
        name: Set(setting.to_owned()),
        value: Set(id.to_string()),
    })
    .on_conflict(
        sea_query::OnConflict::column(mnet_config::Column::Name)
            .update_column(mnet_config::Column::Value)
            .to_owned(),
    )
    .exec_without_returning(db)
    .await?;

    tracing::info!("Seeded {} host record #{}", name, id);
    Ok(())
}

async fn seed_admin(db: &DatabaseConnection, username: &str, password: &str) -> Result<(), DbErr> {
    let existing = user::Entity::find()
        .filter(user::Column::Username.eq(username))
        .one(db)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let password_hash = hash_password(password).map_err(DbErr::Custom)?;
    let now = chrono::Utc::now().to_rfc3339();

    let admin = user::ActiveModel {
        username: Set(username.to_owned()),
        password_hash: Set(password_hash),
        role: Set("admin".to_owned()),
        created_at: Set(now.clone()),
        updated_at: Set(now),
        ..Default::default()
    };

    admin.insert(db).await?;
    tracing::info!("Seeded admin account {}", username);

    Ok(())
}
