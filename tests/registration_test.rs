use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use mnet_peers::config::Config;
use mnet_peers::domain::{
    Application, DomainError, HostId, HostRef, PeerRecord, PeerRepository, SettingsRepository,
    settings,
};
use mnet_peers::infrastructure::AppState;
use mnet_peers::models::mnet_audit_log;
use mnet_peers::services::context::RegistrationContext;
use mnet_peers::services::credentials::{ISSUE_CN_MISMATCH, ISSUE_EXPIRED};
use mnet_peers::services::events::{PeerChange, spawn_audit_logger};
use mnet_peers::services::key_fetcher::KeyFetcher;
use mnet_peers::services::registration::{Drift, HostForm, HostView, Step, StepOutcome};
use mnet_peers::{db, seed};
use rcgen::{CertificateParams, DnType, KeyPair, date_time_ymd};
use sea_orm::{EntityTrait, PaginatorTrait};

const HOST: &str = "http://moodle.example.org";
/// 2026-01-01 00:00:00 UTC
const NOW: i64 = 1_767_225_600;

/// Serves keys from a map; unknown hosts behave like unreachable ones.
#[derive(Default)]
struct StubFetcher {
    keys: DashMap<String, String>,
    calls: AtomicUsize,
}

#[async_trait]
impl KeyFetcher for StubFetcher {
    async fn fetch_public_key(
        &self,
        wwwroot: &str,
        _application: &Application,
    ) -> Result<String, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys
            .get(wwwroot)
            .map(|k| k.clone())
            .ok_or_else(|| DomainError::Network(format!("failed to contact {}", wwwroot)))
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

fn valid_pem() -> String {
    cert_pem(HOST, (2025, 1, 1), (2030, 1, 1))
}

// Helper to build a seeded state around a stub fetcher
async fn setup() -> (AppState, Arc<StubFetcher>) {
    let config = Config {
        key_fetch_timeout: Duration::from_millis(200),
        ..Config::default()
    };
    let db = db::init_db("sqlite::memory:")
        .await
        .expect("Failed to init DB");
    seed::seed_mnet_environment(&db, &config)
        .await
        .expect("Failed to seed");

    let fetcher = Arc::new(StubFetcher::default());
    let state = AppState::with_fetcher(db, config, fetcher.clone());
    (state, fetcher)
}

fn admin() -> RegistrationContext {
    RegistrationContext::new("admin", "admin", "en").at(NOW)
}

fn form(wwwroot: &str) -> HostForm {
    HostForm {
        wwwroot: Some(wwwroot.to_string()),
        application_id: Some(1),
        ..Default::default()
    }
}

async fn commit(state: &AppState, form: HostForm) -> (i32, PeerChange) {
    match state
        .registration
        .process_step(&admin(), Step::Commit, form)
        .await
        .expect("commit failed")
    {
        StepOutcome::Committed { host_id, change } => (host_id, change),
        other => panic!("expected a commit, got {:?}", other),
    }
}

async fn stored(state: &AppState, id: i32) -> PeerRecord {
    state
        .peer_repo
        .find_by_id(id)
        .await
        .expect("lookup failed")
        .expect("host missing")
}

#[tokio::test]
async fn test_input_reviews_without_persisting() {
    let (state, fetcher) = setup().await;
    let pem = valid_pem();
    fetcher.keys.insert(HOST.to_string(), pem.clone());

    let outcome = state
        .registration
        .process_step(&admin(), Step::Input, form("  moodle.example.org/ "))
        .await
        .expect("input failed");

    let StepOutcome::Review(review) = outcome else {
        panic!("expected a review");
    };
    assert_eq!(review.candidate.wwwroot, HOST);
    assert_eq!(review.candidate.id, HostId::Unsaved);
    assert_eq!(review.candidate.name, "moodle.example.org");
    assert_eq!(review.candidate.portno, 80);
    assert_eq!(review.candidate.public_key.as_deref(), Some(pem.trim()));
    assert!(review.credentials.is_some());
    assert!(review.stored.is_none());
    assert_eq!(review.application.name, "moodle");

    let found = state.peer_repo.find_by_wwwroot(HOST).await.unwrap();
    assert!(found.is_none(), "input must not write");
}

#[tokio::test]
async fn test_input_for_registered_host_reports_duplicate() {
    let (state, fetcher) = setup().await;
    fetcher.keys.insert(HOST.to_string(), valid_pem());

    let (id, change) = commit(&state, form(HOST)).await;
    assert_eq!(change, PeerChange::Created);

    // Different spelling, same normalized wwwroot
    let err = state
        .registration
        .process_step(&admin(), Step::Input, form("HTTP://moodle.example.org///"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::DuplicateHost(dup) if dup == id), "{:?}", err);

    let err = state
        .registration
        .process_step(
            &admin(),
            Step::Input,
            HostForm {
                id: Some(id),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::DuplicateHost(dup) if dup == id));
}

#[tokio::test]
async fn test_repeated_commit_is_idempotent() {
    let (state, fetcher) = setup().await;
    fetcher.keys.insert(HOST.to_string(), valid_pem());

    let (first, change) = commit(&state, form(HOST)).await;
    assert_eq!(change, PeerChange::Created);
    let (second, change) = commit(&state, form("moodle.example.org")).await;
    assert_eq!(second, first);
    assert_eq!(change, PeerChange::Updated);

    let ctx = admin();
    let directory = state.registration.list_hosts(&ctx).await.unwrap();
    let matching = directory.hosts.iter().filter(|h| h.wwwroot == HOST).count();
    assert_eq!(matching, 1);
}

#[tokio::test]
async fn test_rejected_key_keeps_stored_key() {
    let (state, _) = setup().await;
    let good = valid_pem();

    let (id, _) = commit(
        &state,
        HostForm {
            public_key: Some(good.clone()),
            ..form(HOST)
        },
    )
    .await;
    let before = stored(&state, id).await;
    assert_eq!(before.public_key.as_deref(), Some(good.trim()));
    assert!(before.public_key_expires.is_some());

    let expired = cert_pem(HOST, (2020, 1, 1), (2021, 1, 1));
    let err = state
        .registration
        .process_step(
            &admin(),
            Step::Commit,
            HostForm {
                id: Some(id),
                name: Some("Renamed".into()),
                public_key: Some(expired),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    match err {
        DomainError::CredentialFailure { host_id, issues } => {
            assert_eq!(host_id, Some(id));
            assert!(issues.iter().any(|i| i.code == ISSUE_EXPIRED));
        }
        other => panic!("expected a credential failure, got {:?}", other),
    }

    let after = stored(&state, id).await;
    assert_eq!(after.public_key, before.public_key);
    assert_eq!(after.public_key_expires, before.public_key_expires);
    assert_eq!(after.name, before.name);
}

#[tokio::test]
async fn test_expired_key_on_new_host_is_itemized() {
    let (state, _) = setup().await;

    let wrong_subject = cert_pem("http://elsewhere.example.org", (2020, 1, 1), (2021, 1, 1));
    let err = state
        .registration
        .process_step(
            &admin(),
            Step::Input,
            HostForm {
                public_key: Some(wrong_subject),
                ..form(HOST)
            },
        )
        .await
        .unwrap_err();

    match err {
        DomainError::CredentialFailure { host_id, issues } => {
            assert_eq!(host_id, None);
            let codes: Vec<u16> = issues.iter().map(|i| i.code).collect();
            assert!(codes.contains(&ISSUE_CN_MISMATCH));
            assert!(codes.contains(&ISSUE_EXPIRED));
        }
        other => panic!("expected a credential failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_key_is_invalidpubkey() {
    let (state, _) = setup().await;

    let err = state
        .registration
        .process_step(
            &admin(),
            Step::Input,
            HostForm {
                public_key: Some("<script>alert(1)</script>".into()),
                ..form(HOST)
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalidpubkey");
}

#[tokio::test]
async fn test_input_validation_errors() {
    let (state, _) = setup().await;
    let ctx = admin();

    let err = state
        .registration
        .process_step(&ctx, Step::Input, form("http://bad host/"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalidurl");

    let err = state
        .registration
        .process_step(&ctx, Step::Input, HostForm::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalidurl");

    let err = state
        .registration
        .process_step(
            &ctx,
            Step::Input,
            HostForm {
                application_id: Some(99),
                ..form(HOST)
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalidapplication");

    let err = state
        .registration
        .process_step(
            &ctx,
            Step::Commit,
            HostForm {
                id: Some(4242),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound));
}

#[tokio::test]
async fn test_unreachable_host_can_still_be_reviewed() {
    let (state, fetcher) = setup().await;

    let outcome = state
        .registration
        .process_step(&admin(), Step::Input, form(HOST))
        .await
        .expect("input failed");
    let StepOutcome::Review(review) = outcome else {
        panic!("expected a review");
    };
    assert!(review.candidate.public_key.is_none());
    assert!(review.credentials.is_none());
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_deleted_host_is_revived_by_wwwroot() {
    let (state, fetcher) = setup().await;
    fetcher.keys.insert(HOST.to_string(), valid_pem());

    let (id, _) = commit(&state, form(HOST)).await;
    commit(
        &state,
        HostForm {
            id: Some(id),
            deleted: Some("1".into()),
            ..Default::default()
        },
    )
    .await;
    assert!(stored(&state, id).await.deleted);

    // A deleted host is not a duplicate
    let outcome = state
        .registration
        .process_step(&admin(), Step::Input, form(HOST))
        .await
        .expect("input failed");
    let StepOutcome::Review(review) = outcome else {
        panic!("expected a review");
    };
    assert_eq!(review.candidate.id, HostId::Saved(id));
    assert!(!review.candidate.deleted);
    assert!(review.changes.iter().any(|c| c.field == "deleted"));

    let (revived, change) = commit(&state, form(HOST)).await;
    assert_eq!(revived, id);
    assert_eq!(change, PeerChange::Updated);
    assert!(!stored(&state, id).await.deleted);
}

#[tokio::test]
async fn test_name_is_stripped_of_markup() {
    let (state, fetcher) = setup().await;
    fetcher.keys.insert(HOST.to_string(), valid_pem());

    let (id, _) = commit(
        &state,
        HostForm {
            name: Some("<b>Campus</b> Moodle".into()),
            ..form(HOST)
        },
    )
    .await;
    assert_eq!(stored(&state, id).await.name, "Campus Moodle");
}

#[tokio::test]
async fn test_review_reports_key_drift_without_writing() {
    let (state, fetcher) = setup().await;
    let stored_pem = valid_pem();

    let (id, _) = commit(
        &state,
        HostForm {
            public_key: Some(stored_pem.clone()),
            ..form(HOST)
        },
    )
    .await;

    let published = valid_pem();
    fetcher.keys.insert(HOST.to_string(), published.clone());

    let view = state
        .registration
        .review_host(&admin(), HostRef::Id(id))
        .await
        .expect("review failed");

    match view {
        HostView::Host {
            record,
            credentials,
            drift,
            ..
        } => {
            assert_eq!(record.id, HostId::Saved(id));
            assert!(credentials.is_some());
            assert_eq!(
                drift,
                Drift::Drifted {
                    stored: Some(stored_pem.trim().to_string()),
                    current: published.trim().to_string(),
                }
            );
        }
        other => panic!("expected a host view, got {:?}", other),
    }

    let after = stored(&state, id).await;
    assert_eq!(after.public_key.as_deref(), Some(stored_pem.trim()));
}

#[tokio::test]
async fn test_review_in_sync_and_unavailable() {
    let (state, fetcher) = setup().await;
    let pem = valid_pem();

    let (id, _) = commit(
        &state,
        HostForm {
            public_key: Some(pem.clone()),
            ..form(HOST)
        },
    )
    .await;

    let view = state
        .registration
        .review_host(&admin(), HostRef::Id(id))
        .await
        .unwrap();
    assert!(matches!(
        view,
        HostView::Host {
            drift: Drift::Unavailable { .. },
            ..
        }
    ));

    fetcher.keys.insert(HOST.to_string(), pem);
    let record = stored(&state, id).await;
    let view = state
        .registration
        .review_host(&admin(), HostRef::from(record))
        .await
        .unwrap();
    assert!(matches!(
        view,
        HostView::Host {
            drift: Drift::InSync,
            ..
        }
    ));
}

#[tokio::test]
async fn test_review_detects_key_rotation() {
    let (state, fetcher) = setup().await;
    let first = valid_pem();

    let (id, _) = commit(
        &state,
        HostForm {
            public_key: Some(first.clone()),
            ..form(HOST)
        },
    )
    .await;

    fetcher.keys.insert(HOST.to_string(), first.clone());
    let view = state
        .registration
        .review_host(&admin(), HostRef::Id(id))
        .await
        .unwrap();
    assert!(matches!(view, HostView::Host { drift: Drift::InSync, .. }));

    // The peer rotates its certificate
    let rotated = valid_pem();
    fetcher.keys.insert(HOST.to_string(), rotated.clone());
    let view = state
        .registration
        .review_host(&admin(), HostRef::Id(id))
        .await
        .unwrap();

    match view {
        HostView::Host { drift, .. } => assert_eq!(
            drift,
            Drift::Drifted {
                stored: Some(first.trim().to_string()),
                current: rotated.trim().to_string(),
            }
        ),
        other => panic!("expected a host view, got {:?}", other),
    }
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_review_of_all_hosts_record() {
    let (state, _) = setup().await;
    let all_hosts: i32 = state
        .settings_repo
        .get(settings::ALL_HOSTS_ID)
        .await
        .unwrap()
        .and_then(|v| v.parse().ok())
        .expect("All Hosts not seeded");

    let view = state
        .registration
        .review_host(&admin(), HostRef::Id(all_hosts))
        .await
        .unwrap();
    assert!(matches!(
        view,
        HostView::AllHosts { host_id, register_all_hosts: false } if host_id == all_hosts
    ));

    let err = state
        .registration
        .review_host(&admin(), HostRef::Id(9999))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound));
}

#[tokio::test]
async fn test_capability_is_required() {
    let (state, _) = setup().await;
    let guest = RegistrationContext::new("guest", "user", "en").at(NOW);

    let err = state
        .registration
        .process_step(&guest, Step::Input, form(HOST))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::PermissionDenied(_)));

    assert!(state.registration.list_hosts(&guest).await.is_err());
    assert!(state
        .registration
        .set_register_all_hosts(&guest, true)
        .await
        .is_err());
}

#[tokio::test]
async fn test_listing_hides_local_site() {
    let (state, fetcher) = setup().await;
    fetcher.keys.insert(HOST.to_string(), valid_pem());
    commit(&state, form(HOST)).await;

    let directory = state.registration.list_hosts(&admin()).await.unwrap();
    let local = Config::default().site_wwwroot;

    assert!(directory.hosts.iter().all(|h| h.wwwroot != local));
    assert!(directory.hosts.iter().any(|h| h.wwwroot == HOST && h.app_name == "moodle"));
    assert_eq!(directory.applications.len(), 2);
    assert!(!directory.register_all_hosts);
}

#[tokio::test]
async fn test_register_all_hosts_toggle() {
    let (state, _) = setup().await;
    let ctx = admin();

    state.registration.set_register_all_hosts(&ctx, true).await.unwrap();
    assert!(state.registration.list_hosts(&ctx).await.unwrap().register_all_hosts);
    assert_eq!(
        state
            .settings_repo
            .get(settings::REGISTER_ALL_HOSTS)
            .await
            .unwrap()
            .as_deref(),
        Some("1")
    );

    state.registration.set_register_all_hosts(&ctx, false).await.unwrap();
    assert!(!state.registration.list_hosts(&ctx).await.unwrap().register_all_hosts);
}

#[tokio::test]
async fn test_store_rejects_second_active_wwwroot() {
    let (state, _) = setup().await;

    let record = PeerRecord::candidate(HOST.into(), "moodle.example.org".into(), 1, 80);
    let first = state.peer_repo.insert(&record).await.unwrap();

    let err = state.peer_repo.insert(&record).await.unwrap_err();
    assert!(matches!(err, DomainError::DuplicateHost(id) if id == first), "{:?}", err);

    // A deleted row does not hold the wwwroot
    let mut gone = stored(&state, first).await;
    gone.deleted = true;
    state.peer_repo.update(&gone).await.unwrap();
    let second = state.peer_repo.insert(&record).await.unwrap();
    assert_ne!(second, first);
}

#[tokio::test]
async fn test_commit_is_audited() {
    let (state, fetcher) = setup().await;
    fetcher.keys.insert(HOST.to_string(), valid_pem());
    let logger = spawn_audit_logger(state.db().clone(), &state.events);

    let (id, _) = commit(&state, form(HOST)).await;
    commit(&state, form(HOST)).await;

    let mut rows = 0;
    for _ in 0..50 {
        rows = mnet_audit_log::Entity::find().count(state.db()).await.unwrap();
        if rows >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(rows, 2);

    let entries = mnet_audit_log::Entity::find().all(state.db()).await.unwrap();
    assert!(entries.iter().all(|e| e.host_id == id && e.actor == "admin"));
    assert_eq!(entries[0].operation, "created");
    assert_eq!(entries[1].operation, "updated");

    logger.abort();
}
