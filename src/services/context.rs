//! Per-request context handed to every workflow call.
//!
//! Carries who is acting, what they may do, which language to answer in and
//! which trust settings apply, so the workflow never reaches for globals.

use crate::domain::DomainError;
use crate::services::credentials::CredentialPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Change site-wide configuration, including trusted hosts
    SiteConfig,
}

impl Capability {
    pub fn name(self) -> &'static str {
        match self {
            Capability::SiteConfig => "site:config",
        }
    }

    /// Capabilities granted by a role
    pub fn for_role(role: &str) -> Vec<Capability> {
        match role {
            "admin" => vec![Capability::SiteConfig],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationContext {
    pub actor: String,
    pub capabilities: Vec<Capability>,
    pub locale: String,
    pub policy: CredentialPolicy,
    /// Fixed clock for tests; `None` reads the system time.
    pub clock: Option<i64>,
}

impl RegistrationContext {
    pub fn new(actor: impl Into<String>, role: &str, locale: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            capabilities: Capability::for_role(role),
            locale: locale.into(),
            policy: CredentialPolicy::default(),
            clock: None,
        }
    }

    pub fn with_policy(mut self, policy: CredentialPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn at(mut self, now: i64) -> Self {
        self.clock = Some(now);
        self
    }

    pub fn now(&self) -> i64 {
        self.clock
            .unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    pub fn require(&self, capability: Capability) -> Result<(), DomainError> {
        if self.capabilities.contains(&capability) {
            Ok(())
        } else {
            tracing::warn!("{} lacks capability {}", self.actor, capability.name());
            Err(DomainError::PermissionDenied(capability.name().to_string()))
        }
    }
}
