use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};

pub async fn init_db(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;

    // Run migrations manually (simple SQL)
    run_migrations(&db).await?;

    Ok(db)
}

async fn execute(db: &DatabaseConnection, sql: &str) -> Result<(), DbErr> {
    db.execute(Statement::from_string(
        db.get_database_backend(),
        sql.to_owned(),
    ))
    .await?;
    Ok(())
}

async fn run_migrations(db: &DatabaseConnection) -> Result<(), DbErr> {
    // Applications a peer can run
    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS mnet_application (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            xmlrpc_server_url TEXT NOT NULL
        )
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        INSERT OR IGNORE INTO mnet_application (id, name, display_name, xmlrpc_server_url)
        VALUES (1, 'moodle', 'Moodle', '/mnet/xmlrpc/server.php'),
               (2, 'mahara', 'Mahara', '/api/xmlrpc/server.php')
        "#,
    )
    .await?;

    // Known hosts
    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS mnet_host (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            deleted BOOLEAN NOT NULL DEFAULT 0,
            wwwroot TEXT NOT NULL,
            ip_address TEXT,
            name TEXT NOT NULL,
            public_key TEXT,
            public_key_expires INTEGER,
            portno INTEGER NOT NULL DEFAULT 80,
            last_connect_time INTEGER,
            applicationid INTEGER NOT NULL DEFAULT 1 REFERENCES mnet_application(id),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .await?;

    // Two active hosts may never share a wwwroot
    execute(
        db,
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_mnet_host_active_wwwroot
        ON mnet_host (wwwroot) WHERE deleted = 0
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS mnet_config (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        INSERT OR IGNORE INTO mnet_config (name, value)
        VALUES ('mnet_dispatcher_mode', 'off'),
               ('mnet_register_allhosts', '0')
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS mnet_audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            host_id INTEGER NOT NULL,
            wwwroot TEXT NOT NULL,
            operation TEXT NOT NULL,
            actor TEXT NOT NULL,
            payload TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'manager',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .await?;

    Ok(())
}
