use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use mnet_peers::config::Config;
use mnet_peers::domain::{Application, DomainError};
use mnet_peers::infrastructure::AppState;
use mnet_peers::services::key_fetcher::KeyFetcher;
use mnet_peers::{db, seed, server};
use rcgen::{CertificateParams, DnType, KeyPair, date_time_ymd};
use serde_json::{Value, json};
use tower::util::ServiceExt; // for `oneshot`
use url::form_urlencoded;

const HOST: &str = "http://moodle.example.org";

/// Every peer is unreachable.
struct OfflineFetcher {
    xmlrpc: bool,
}

#[async_trait]
impl KeyFetcher for OfflineFetcher {
    async fn fetch_public_key(
        &self,
        wwwroot: &str,
        _application: &Application,
    ) -> Result<String, DomainError> {
        Err(DomainError::Network(format!("failed to contact {}", wwwroot)))
    }

    fn speaks_xmlrpc(&self) -> bool {
        self.xmlrpc
    }
}

fn cert_pem(cn: &str, from: (i32, u8, u8), to: (i32, u8, u8)) -> String {
    let mut params = CertificateParams::new(vec!["moodle.example.org".to_string()])
        .expect("params");
    params.distinguished_name.push(DnType::CommonName, cn);
    params.not_before = date_time_ymd(from.0, from.1, from.2);
    params.not_after = date_time_ymd(to.0, to.1, to.2);
    let key = KeyPair::generate().expect("keypair");
    params.self_signed(&key).expect("self signed").pem()
}

// Helper to build the full router with a seeded admin account
async fn setup_app(xmlrpc: bool) -> Router {
    let config = Config {
        key_fetch_timeout: Duration::from_millis(200),
        admin_username: Some("admin".to_string()),
        admin_password: Some("admin_password".to_string()),
        ..Config::default()
    };
    let db = db::init_db("sqlite::memory:")
        .await
        .expect("Failed to init DB");
    seed::seed_mnet_environment(&db, &config)
        .await
        .expect("Failed to seed");

    let state = AppState::with_fetcher(db, config, Arc::new(OfflineFetcher { xmlrpc }));
    server::build_router(state)
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Log in and return (bearer token, sesskey)
async fn login(app: &Router) -> (String, String) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "username": "admin", "password": "admin_password" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    (
        body["token"].as_str().unwrap().to_string(),
        body["sesskey"].as_str().unwrap().to_string(),
    )
}

async fn submit(app: &Router, token: &str, fields: &[(&str, &str)]) -> (StatusCode, Value) {
    let body = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/mnet/peers")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    (status, read_json(response).await)
}

#[tokio::test]
async fn test_health_and_openapi() {
    let app = setup_app(true).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["service"], "mnet-peers");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc = read_json(response).await;
    assert!(doc["paths"]["/api/mnet/peers"].is_object());
}

#[tokio::test]
async fn test_login_rejects_wrong_password() {
    let app = setup_app(true).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "username": "admin", "password": "nope" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(response).await["error"], "invalidlogin");
}

#[tokio::test]
async fn test_peers_require_login() {
    let app = setup_app(true).await;

    let response = app
        .oneshot(Request::builder().uri("/api/mnet/peers").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(response).await["error"], "requirelogin");
}

#[tokio::test]
async fn test_form_without_sesskey_is_rejected() {
    let app = setup_app(true).await;
    let (token, _) = login(&app).await;

    let (status, body) = submit(
        &app,
        &token,
        &[("step", "input"), ("wwwroot", HOST), ("applicationid", "1")],
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "invalidsesskey");

    let (status, _) = submit(
        &app,
        &token,
        &[("sesskey", "00ff"), ("step", "input"), ("wwwroot", HOST)],
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_step_is_invalidaction() {
    let app = setup_app(true).await;
    let (token, sesskey) = login(&app).await;

    let (status, body) = submit(
        &app,
        &token,
        &[("sesskey", sesskey.as_str()), ("step", "drop")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalidaction");
}

#[tokio::test]
async fn test_register_host_over_http() {
    let app = setup_app(true).await;
    let (token, sesskey) = login(&app).await;
    let pem = cert_pem(HOST, (2025, 1, 1), (2035, 1, 1));

    let (status, review) = submit(
        &app,
        &token,
        &[
            ("sesskey", sesskey.as_str()),
            ("step", "input"),
            ("wwwroot", "moodle.example.org/"),
            ("applicationid", "1"),
            ("public_key", pem.as_str()),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", review);
    assert_eq!(review["outcome"], "review");
    assert_eq!(review["candidate"]["wwwroot"], HOST);
    assert!(review["candidate"]["id"].is_null());

    let (status, committed) = submit(
        &app,
        &token,
        &[
            ("sesskey", sesskey.as_str()),
            ("step", "commit"),
            ("wwwroot", HOST),
            ("applicationid", "1"),
            ("name", "Campus Moodle"),
            ("public_key", pem.as_str()),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", committed);
    let host_id = committed["hostid"].as_i64().unwrap();
    assert_eq!(committed["message"], "Changes saved");
    assert_eq!(committed["redirect"], format!("/api/mnet/peers/{}", host_id));

    // Second input for the same host
    let (status, dup) = submit(
        &app,
        &token,
        &[
            ("sesskey", sesskey.as_str()),
            ("step", "input"),
            ("wwwroot", HOST),
            ("applicationid", "1"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(dup["error"], "hostexists");
    assert_eq!(dup["hostid"].as_i64(), Some(host_id));

    // Review shows the stored host; the peer is offline so drift is unknown
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/mnet/peers/{}", host_id))
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let view = read_json(response).await;
    assert_eq!(view["view"], "host");
    assert_eq!(view["record"]["name"], "Campus Moodle");
    assert_eq!(view["drift"]["status"], "unavailable");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/mnet/peers")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listing = read_json(response).await;
    let hosts = listing["hosts"].as_array().unwrap();
    assert!(hosts.iter().any(|h| h["wwwroot"] == HOST));
}

#[tokio::test]
async fn test_expired_key_is_itemized_and_localized() {
    let app = setup_app(true).await;
    let (token, sesskey) = login(&app).await;
    let expired = cert_pem(HOST, (2020, 1, 1), (2021, 1, 1));

    let body = form_urlencoded::Serializer::new(String::new())
        .extend_pairs([
            ("sesskey", sesskey.as_str()),
            ("step", "input"),
            ("wwwroot", HOST),
            ("applicationid", "1"),
            ("public_key", expired.as_str()),
        ])
        .finish();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/mnet/peers")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::ACCEPT_LANGUAGE, "fr")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["error"], "invalidpubkey");
    assert!(body["hostid"].is_null());
    let issues = body["issues"].as_array().unwrap();
    assert!(issues.iter().any(|i| i["code"] == 6));
    assert_ne!(body["detail"], "Invalid public key");
}

#[tokio::test]
async fn test_register_all_hosts_toggle_over_http() {
    let app = setup_app(true).await;
    let (token, sesskey) = login(&app).await;

    let (status, body) = submit(
        &app,
        &token,
        &[
            ("sesskey", sesskey.as_str()),
            ("updateregisterall", "1"),
            ("registerallhosts", "1"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["register_all_hosts"], true);
}

#[tokio::test]
async fn test_missing_xmlrpc_is_a_precondition_failure() {
    let app = setup_app(false).await;
    let (token, sesskey) = login(&app).await;

    let (status, body) = submit(
        &app,
        &token,
        &[("sesskey", sesskey.as_str()), ("step", "input"), ("wwwroot", HOST)],
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "xmlrpc-missing");
}
