//! Certificate checks for peer public keys.
//!
//! A peer publishes its key as a PEM X.509 certificate whose subject CN is
//! the peer's wwwroot. Parsing is delegated to `x509-parser`; this module
//! only decides whether the certificate is acceptable for a given host and
//! extracts the expiry we store next to the key.

use serde::Serialize;
use x509_parser::extensions::GeneralName;
use x509_parser::pem::parse_x509_pem;

use crate::domain::CredentialIssue;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Subject CNs are capped at 64 characters, so only that prefix is compared.
const CN_MAX_LEN: usize = 64;

pub const ISSUE_UNPARSEABLE: u16 = 3;
pub const ISSUE_CN_MISMATCH: u16 = 4;
pub const ISSUE_SAN_MISMATCH: u16 = 5;
pub const ISSUE_EXPIRED: u16 = 6;
pub const ISSUE_NOT_YET_VALID: u16 = 7;

/// Trust settings supplied by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialPolicy {
    /// Require subject CN / URI SAN to match the host wwwroot
    pub verify_subject: bool,
    /// Tolerance applied to notBefore/notAfter
    pub clock_skew_secs: i64,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            verify_subject: true,
            clock_skew_secs: 0,
        }
    }
}

/// What we learned from an accepted certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub expires: i64,
    pub not_before: i64,
    pub subject_cn: Option<String>,
    pub subject_alt_uri: Option<String>,
    pub issuer: String,
    pub serial: String,
}

/// Itemized reasons a certificate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub issues: Vec<CredentialIssue>,
}

impl ValidationFailure {
    fn single(code: u16, message: impl Into<String>) -> Self {
        Self {
            issues: vec![CredentialIssue {
                code,
                message: message.into(),
            }],
        }
    }

    pub fn has(&self, code: u16) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

/// Sanitize a submitted PEM blob.
///
/// Accepts exactly one certificate block whose body is base64 and
/// whitespace; anything else yields `None`.
pub fn clean_pem(raw: &str) -> Option<String> {
    let pem = raw.trim();
    let body = pem.strip_prefix(PEM_BEGIN)?.strip_suffix(PEM_END)?;

    let body_ok = !body.trim().is_empty()
        && body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=') || c.is_whitespace());

    body_ok.then(|| pem.to_string())
}

/// Parse `pem` and check it is usable as the key of `wwwroot` at time `now`.
pub fn validate(
    pem: &str,
    wwwroot: &str,
    policy: &CredentialPolicy,
    now: i64,
) -> Result<Credentials, ValidationFailure> {
    let (_, block) = parse_x509_pem(pem.as_bytes()).map_err(|e| {
        ValidationFailure::single(ISSUE_UNPARSEABLE, format!("not a PEM document: {e}"))
    })?;

    if block.label != "CERTIFICATE" {
        return Err(ValidationFailure::single(
            ISSUE_UNPARSEABLE,
            format!("expected a CERTIFICATE block, got {}", block.label),
        ));
    }

    let cert = block.parse_x509().map_err(|e| {
        ValidationFailure::single(ISSUE_UNPARSEABLE, format!("X.509 parse error: {e}"))
    })?;

    let subject_cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned);

    let subject_alt_uri = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .and_then(|ext| {
            ext.value.general_names.iter().find_map(|name| match name {
                GeneralName::URI(uri) => Some(uri.to_string()),
                _ => None,
            })
        });

    let mut issues = Vec::new();

    if policy.verify_subject {
        if let Some(uri) = &subject_alt_uri {
            if uri.trim_end_matches('/') != wwwroot {
                issues.push(CredentialIssue {
                    code: ISSUE_SAN_MISMATCH,
                    message: format!(
                        "certificate subjectAltName {} does not match host {}",
                        uri, wwwroot
                    ),
                });
            }
        }

        let expected_cn: String = wwwroot.chars().take(CN_MAX_LEN).collect();
        match &subject_cn {
            Some(cn) if *cn == expected_cn => {}
            Some(cn) => issues.push(CredentialIssue {
                code: ISSUE_CN_MISMATCH,
                message: format!("certificate CN {} does not match host {}", cn, wwwroot),
            }),
            None => issues.push(CredentialIssue {
                code: ISSUE_CN_MISMATCH,
                message: "certificate has no subject common name".to_string(),
            }),
        }
    }

    let validity = cert.validity();
    let not_before = validity.not_before.timestamp();
    let expires = validity.not_after.timestamp();

    if expires < now - policy.clock_skew_secs {
        issues.push(CredentialIssue {
            code: ISSUE_EXPIRED,
            message: format!("certificate expired at {}", format_ts(expires)),
        });
    }
    if not_before > now + policy.clock_skew_secs {
        issues.push(CredentialIssue {
            code: ISSUE_NOT_YET_VALID,
            message: format!("certificate not valid before {}", format_ts(not_before)),
        });
    }

    if !issues.is_empty() {
        return Err(ValidationFailure { issues });
    }

    Ok(Credentials {
        expires,
        not_before,
        subject_cn,
        subject_alt_uri,
        issuer: cert.issuer().to_string(),
        serial: hex::encode(cert.raw_serial()),
    })
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}
