//! Peer host registration workflow.
//!
//! Registering a host is a two step exchange: `input` builds a candidate
//! record from the submitted form, checks its certificate and returns a
//! review of what would change; `commit` repeats the same checks and
//! persists. A host id on its own (no step) goes through `review_host`,
//! which compares the stored key with the one the host publishes today.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::domain::{
    Application, ApplicationRepository, DomainError, HostId, HostRef, PeerListing, PeerRecord,
    PeerRepository, SettingsRepository, settings,
};
use crate::services::context::{Capability, RegistrationContext};
use crate::services::credentials::{self, Credentials};
use crate::services::events::{EventBus, PeerChange, PeerEvent};
use crate::services::key_fetcher::{KeyFetcher, RemoteKeyCache};
use crate::utils::{is_valid_wwwroot, normalize_wwwroot, strip_tags, wwwroot_host, wwwroot_port};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Input,
    Commit,
}

impl Step {
    pub fn parse(raw: &str) -> Option<Step> {
        match raw {
            "input" => Some(Step::Input),
            "commit" => Some(Step::Commit),
            _ => None,
        }
    }
}

/// Host fields as submitted by the operator, already decoded from the form.
#[derive(Debug, Clone, Default)]
pub struct HostForm {
    pub id: Option<i32>,
    pub wwwroot: Option<String>,
    pub name: Option<String>,
    /// Only "0" and "1" have an effect
    pub deleted: Option<String>,
    pub public_key: Option<String>,
    pub application_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: &'static str,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// What the confirmation screen shows before a commit.
#[derive(Debug, Clone, Serialize)]
pub struct HostReview {
    pub candidate: PeerRecord,
    pub stored: Option<PeerRecord>,
    pub changes: Vec<FieldChange>,
    pub credentials: Option<Credentials>,
    pub application: Application,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum StepOutcome {
    Review(Box<HostReview>),
    Committed { host_id: i32, change: PeerChange },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Drift {
    InSync,
    Drifted {
        stored: Option<String>,
        current: String,
    },
    Unavailable {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "view", rename_all = "lowercase")]
pub enum HostView {
    Host {
        record: Box<PeerRecord>,
        application: Application,
        credentials: Option<Credentials>,
        drift: Drift,
    },
    AllHosts {
        host_id: i32,
        register_all_hosts: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct HostDirectory {
    pub hosts: Vec<PeerListing>,
    pub applications: Vec<Application>,
    pub register_all_hosts: bool,
}

pub struct RegistrationService {
    peers: Arc<dyn PeerRepository>,
    applications: Arc<dyn ApplicationRepository>,
    settings: Arc<dyn SettingsRepository>,
    fetcher: Arc<dyn KeyFetcher>,
    key_cache: RemoteKeyCache,
    events: EventBus,
    lookup_timeout: Duration,
}

impl RegistrationService {
    pub fn new(
        peers: Arc<dyn PeerRepository>,
        applications: Arc<dyn ApplicationRepository>,
        settings: Arc<dyn SettingsRepository>,
        fetcher: Arc<dyn KeyFetcher>,
        key_cache: RemoteKeyCache,
        events: EventBus,
    ) -> Self {
        Self {
            peers,
            applications,
            settings,
            fetcher,
            key_cache,
            events,
            lookup_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn fetcher(&self) -> &dyn KeyFetcher {
        self.fetcher.as_ref()
    }

    /// Run one step of the registration exchange.
    pub async fn process_step(
        &self,
        ctx: &RegistrationContext,
        step: Step,
        form: HostForm,
    ) -> Result<StepOutcome, DomainError> {
        ctx.require(Capability::SiteConfig)?;

        let wwwroot = form
            .wwwroot
            .as_deref()
            .filter(|w| !w.trim().is_empty())
            .map(normalize_wwwroot);

        let (mut candidate, stored, application) = match form.id.filter(|id| *id > 0) {
            Some(id) => {
                let record = self.peers.find_by_id(id).await?.ok_or(DomainError::NotFound)?;
                let application = self.application(record.application_id).await?;
                (record.clone(), Some(record), application)
            }
            None => {
                let wwwroot = wwwroot.ok_or_else(|| {
                    DomainError::validation("invalidurl", "a wwwroot is required for a new host")
                })?;
                if !is_valid_wwwroot(&wwwroot) {
                    return Err(DomainError::validation(
                        "invalidurl",
                        format!("{} is not a valid URL", wwwroot),
                    ));
                }
                let application = self
                    .application(form.application_id.unwrap_or_default())
                    .await?;
                let fetch_key = form.public_key.is_none();
                self.bootstrap(ctx, &wwwroot, &application, fetch_key).await?
            }
        };

        if let Some(name) = &form.name {
            if *name != candidate.name {
                candidate.name = strip_tags(name);
            }
        }

        match form.deleted.as_deref() {
            Some("0") => candidate.deleted = false,
            Some("1") => candidate.deleted = true,
            _ => {}
        }

        let credentials = match &form.public_key {
            Some(raw) => {
                let Some(pem) = credentials::clean_pem(raw) else {
                    return Err(DomainError::validation(
                        "invalidpubkey",
                        "the submitted key is not a PEM certificate",
                    ));
                };
                match credentials::validate(&pem, &candidate.wwwroot, &ctx.policy, ctx.now()) {
                    Ok(creds) => {
                        candidate.public_key = Some(pem);
                        candidate.public_key_expires = Some(creds.expires);
                        Some(creds)
                    }
                    Err(failure) => {
                        tracing::warn!(
                            "Rejected public key for {}: {} issue(s)",
                            candidate.wwwroot,
                            failure.issues.len()
                        );
                        return Err(DomainError::CredentialFailure {
                            host_id: candidate.id.get(),
                            issues: failure.issues,
                        });
                    }
                }
            }
            None => candidate.public_key.as_deref().and_then(|key| {
                credentials::validate(key, &candidate.wwwroot, &ctx.policy, ctx.now()).ok()
            }),
        };

        match step {
            Step::Input => {
                if let Some(existing) = stored.as_ref().filter(|s| s.is_active()) {
                    let id = existing.id.get().unwrap_or_default();
                    return Err(DomainError::DuplicateHost(id));
                }
                let changes = diff(stored.as_ref(), &candidate);
                Ok(StepOutcome::Review(Box::new(HostReview {
                    candidate,
                    stored,
                    changes,
                    credentials,
                    application,
                })))
            }
            Step::Commit => self.commit(ctx, candidate, stored.as_ref()).await,
        }
    }

    async fn commit(
        &self,
        ctx: &RegistrationContext,
        candidate: PeerRecord,
        stored: Option<&PeerRecord>,
    ) -> Result<StepOutcome, DomainError> {
        let (host_id, change) = match candidate.id {
            HostId::Unsaved => (self.peers.insert(&candidate).await, PeerChange::Created),
            HostId::Saved(id) => (
                self.peers.update(&candidate).await.map(|_| id),
                PeerChange::Updated,
            ),
        };

        let host_id = host_id.inspect_err(|e| {
            tracing::error!("Failed to commit host {}: {}", candidate.wwwroot, e);
        })?;

        tracing::info!(
            "Host #{} ({}) {} by {}",
            host_id,
            candidate.wwwroot,
            change.as_str(),
            ctx.actor
        );

        self.events.publish(PeerEvent {
            change,
            host_id,
            wwwroot: candidate.wwwroot.clone(),
            actor: ctx.actor.clone(),
            deleted: candidate.deleted,
            public_key_changed: stored.map(|s| &s.public_key) != Some(&candidate.public_key),
        });

        Ok(StepOutcome::Committed { host_id, change })
    }

    /// Build the candidate for a wwwroot that came without an id.
    ///
    /// A record already holding that wwwroot is reused (a deleted one is
    /// revived); otherwise a fresh record is prepared from what we can
    /// learn about the host.
    async fn bootstrap(
        &self,
        ctx: &RegistrationContext,
        wwwroot: &str,
        application: &Application,
        fetch_key: bool,
    ) -> Result<(PeerRecord, Option<PeerRecord>, Application), DomainError> {
        if let Some(existing) = self.peers.find_by_wwwroot(wwwroot).await? {
            let mut candidate = existing.clone();
            candidate.deleted = false;
            candidate.application_id = application.id;
            return Ok((candidate, Some(existing), application.clone()));
        }

        let host = wwwroot_host(wwwroot).unwrap_or_else(|| wwwroot.to_string());
        let portno = wwwroot_port(wwwroot);
        let mut candidate = PeerRecord::candidate(
            wwwroot.to_string(),
            host.clone(),
            application.id,
            portno,
        );
        candidate.ip_address = self.resolve_ip(&host, portno).await;

        if fetch_key {
            match self
                .key_cache
                .fetch(self.fetcher.as_ref(), wwwroot, application)
                .await
            {
                Ok(raw) => match credentials::clean_pem(&raw) {
                    Some(pem) => {
                        match credentials::validate(&pem, wwwroot, &ctx.policy, ctx.now()) {
                            Ok(creds) => {
                                candidate.public_key = Some(pem);
                                candidate.public_key_expires = Some(creds.expires);
                            }
                            Err(failure) => tracing::warn!(
                                "Discarding key published by {}: {:?}",
                                wwwroot,
                                failure.issues
                            ),
                        }
                    }
                    None => tracing::warn!("{} published something that is not a PEM certificate", wwwroot),
                },
                Err(e) => tracing::warn!("No public key for {}: {}", wwwroot, e),
            }
        }

        Ok((candidate, None, application.clone()))
    }

    async fn resolve_ip(&self, host: &str, port: i32) -> Option<String> {
        let port = u16::try_from(port).unwrap_or(80);
        match tokio::time::timeout(self.lookup_timeout, tokio::net::lookup_host((host, port))).await
        {
            Ok(Ok(mut addrs)) => addrs.next().map(|addr| addr.ip().to_string()),
            Ok(Err(e)) => {
                tracing::debug!("DNS lookup for {} failed: {}", host, e);
                None
            }
            Err(_) => {
                tracing::debug!("DNS lookup for {} timed out", host);
                None
            }
        }
    }

    async fn application(&self, id: i32) -> Result<Application, DomainError> {
        self.applications.find_by_id(id).await?.ok_or_else(|| {
            DomainError::validation("invalidapplication", format!("unknown application {}", id))
        })
    }

    async fn setting_id(&self, key: &str) -> Result<Option<i32>, DomainError> {
        Ok(self
            .settings
            .get(key)
            .await?
            .and_then(|v| v.parse::<i32>().ok()))
    }

    async fn register_all_hosts(&self) -> Result<bool, DomainError> {
        Ok(self.settings.get(settings::REGISTER_ALL_HOSTS).await?.as_deref() == Some("1"))
    }

    /// Turn a reference into a loaded record.
    pub async fn resolve(&self, host: HostRef) -> Result<PeerRecord, DomainError> {
        match host {
            HostRef::Loaded(record) => Ok(*record),
            HostRef::Id(id) => self.peers.find_by_id(id).await?.ok_or(DomainError::NotFound),
        }
    }

    /// Show a stored host and whether its key drifted from what it publishes.
    pub async fn review_host(
        &self,
        ctx: &RegistrationContext,
        host: HostRef,
    ) -> Result<HostView, DomainError> {
        ctx.require(Capability::SiteConfig)?;

        let record = self.resolve(host).await?;
        let all_hosts_id = self.setting_id(settings::ALL_HOSTS_ID).await?;

        if let (Some(id), Some(all)) = (record.id.get(), all_hosts_id) {
            if id == all {
                return Ok(HostView::AllHosts {
                    host_id: id,
                    register_all_hosts: self.register_all_hosts().await?,
                });
            }
        }

        let application = self.application(record.application_id).await?;
        let credentials = record.public_key.as_deref().and_then(|key| {
            credentials::validate(key, &record.wwwroot, &ctx.policy, ctx.now()).ok()
        });

        // Drift is judged against what the peer publishes right now
        let drift = match self
            .key_cache
            .refresh(self.fetcher.as_ref(), &record.wwwroot, &application)
            .await
        {
            Ok(current) => {
                let current = current.trim().to_string();
                if record.public_key.as_deref().map(str::trim) == Some(current.as_str()) {
                    Drift::InSync
                } else {
                    tracing::info!("Key drift detected for {}", record.wwwroot);
                    Drift::Drifted {
                        stored: record.public_key.clone(),
                        current,
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Drift check for {} unavailable: {}", record.wwwroot, e);
                Drift::Unavailable {
                    reason: e.to_string(),
                }
            }
        };

        Ok(HostView::Host {
            record: Box::new(record),
            application,
            credentials,
            drift,
        })
    }

    /// Active peers (the local site excluded), applications and the
    /// register-all flag.
    pub async fn list_hosts(&self, ctx: &RegistrationContext) -> Result<HostDirectory, DomainError> {
        ctx.require(Capability::SiteConfig)?;

        let localhost_id = self.setting_id(settings::LOCALHOST_ID).await?;
        Ok(HostDirectory {
            hosts: self.peers.list_active(localhost_id).await?,
            applications: self.applications.find_all().await?,
            register_all_hosts: self.register_all_hosts().await?,
        })
    }

    pub async fn set_register_all_hosts(
        &self,
        ctx: &RegistrationContext,
        enabled: bool,
    ) -> Result<(), DomainError> {
        ctx.require(Capability::SiteConfig)?;

        self.settings
            .set(settings::REGISTER_ALL_HOSTS, if enabled { "1" } else { "0" })
            .await?;
        tracing::info!("{} set register-all-hosts to {}", ctx.actor, enabled);
        Ok(())
    }
}

/// Fields that differ between the stored record and the candidate.
fn diff(stored: Option<&PeerRecord>, candidate: &PeerRecord) -> Vec<FieldChange> {
    let before = |f: fn(&PeerRecord) -> Option<String>| stored.and_then(f);

    let fields: [(&'static str, fn(&PeerRecord) -> Option<String>); 6] = [
        ("wwwroot", |r| Some(r.wwwroot.clone())),
        ("name", |r| Some(r.name.clone())),
        ("applicationid", |r| Some(r.application_id.to_string())),
        ("deleted", |r| Some(u8::from(r.deleted).to_string())),
        ("public_key", |r| r.public_key.clone()),
        ("public_key_expires", |r| {
            r.public_key_expires.map(|t| t.to_string())
        }),
    ];

    fields
        .into_iter()
        .filter_map(|(field, get)| {
            let old = before(get);
            let new = get(candidate);
            (old != new).then_some(FieldChange { field, old, new })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_parsing() {
        assert_eq!(Step::parse("input"), Some(Step::Input));
        assert_eq!(Step::parse("commit"), Some(Step::Commit));
        assert_eq!(Step::parse("update"), None);
    }

    #[test]
    fn diff_of_new_host_lists_every_set_field() {
        let candidate =
            PeerRecord::candidate("http://a.example".into(), "a.example".into(), 1, 80);
        let changes = diff(None, &candidate);
        let fields: Vec<_> = changes.iter().map(|c| c.field).collect();
        assert_eq!(fields, vec!["wwwroot", "name", "applicationid", "deleted"]);
    }

    #[test]
    fn diff_reports_only_changed_fields() {
        let mut stored =
            PeerRecord::candidate("http://a.example".into(), "a.example".into(), 1, 80);
        stored.id = HostId::Saved(9);
        let mut candidate = stored.clone();
        candidate.name = "Campus A".into();

        let changes = diff(Some(&stored), &candidate);
        assert_eq!(
            changes,
            vec![FieldChange {
                field: "name",
                old: Some("a.example".into()),
                new: Some("Campus A".into()),
            }]
        );
    }
}
