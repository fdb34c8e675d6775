use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mnet_peers::infrastructure::AppState;
use mnet_peers::{config, db, seed, server};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mnet_peers=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let mut config = config::Config::from_env();

    // --port overrides PORT
    let args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().position(|arg| arg == "--port") {
        match args.get(pos + 1).and_then(|v| v.parse().ok()) {
            Some(port) => config.port = port,
            None => tracing::warn!("Ignoring --port without a valid port number"),
        }
    }

    // Initialize database
    let db = match db::init_db(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to initialize database {}: {}", config.database_url, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = seed::seed_mnet_environment(&db, &config).await {
        tracing::error!("Failed to seed mnet environment: {}", e);
        std::process::exit(1);
    }

    if config.local_public_key.is_none() {
        tracing::warn!("MNET_PUBLIC_KEY_FILE not set, keyswap requests will carry no key");
    }

    let port = config.port;
    let state = match AppState::new(db, config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Cannot start the peer registry: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server::serve(state, port).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
