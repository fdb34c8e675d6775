use std::env;
use std::time::Duration;

use crate::services::credentials::CredentialPolicy;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub profile: String,
    /// Our own wwwroot, sent to peers during keyswap
    pub site_wwwroot: String,
    /// Our own public certificate (PEM), sent to peers during keyswap
    pub local_public_key: Option<String>,
    pub key_fetch_timeout: Duration,
    pub verify_cert_subject: bool,
    pub cert_clock_skew_secs: i64,
    pub default_locale: String,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let profile = env::var("PROFILE").unwrap_or_else(|_| "default".to_string());

        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| {
            if profile == "default" {
                "sqlite://mnet_peers.db?mode=rwc".to_string()
            } else {
                format!("sqlite://mnet_peers_{}.db?mode=rwc", profile)
            }
        });

        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);

        let local_public_key = env::var("MNET_PUBLIC_KEY_FILE").ok().and_then(|path| {
            match std::fs::read_to_string(&path) {
                Ok(pem) => Some(pem),
                Err(e) => {
                    tracing::warn!("Cannot read MNET_PUBLIC_KEY_FILE {}: {}", path, e);
                    None
                }
            }
        });

        Self {
            database_url,
            port,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(Vec::new),
            profile,
            site_wwwroot: env::var("MNET_SITE_WWWROOT")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            local_public_key,
            key_fetch_timeout: Duration::from_secs(
                env::var("MNET_KEY_FETCH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            verify_cert_subject: env::var("MNET_VERIFY_CERT_SUBJECT")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            cert_clock_skew_secs: env::var("MNET_CERT_CLOCK_SKEW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            default_locale: env::var("MNET_DEFAULT_LOCALE").unwrap_or_else(|_| "en".to_string()),
            admin_username: env::var("ADMIN_USERNAME").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
        }
    }

    /// Trust settings handed to the credential validator
    pub fn credential_policy(&self) -> CredentialPolicy {
        CredentialPolicy {
            verify_subject: self.verify_cert_subject,
            clock_skew_secs: self.cert_clock_skew_secs,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            port: 8000,
            cors_allowed_origins: Vec::new(),
            profile: "default".to_string(),
            site_wwwroot: "http://localhost:8000".to_string(),
            local_public_key: None,
            key_fetch_timeout: Duration::from_secs(5),
            verify_cert_subject: true,
            cert_clock_skew_secs: 0,
            default_locale: "en".to_string(),
            admin_username: None,
            admin_password: None,
        }
    }
}
