//! Canonical form of a host's wwwroot and the strict syntax check applied
//! to new hosts.

use url::Url;

/// Trim, drop trailing slashes and force an http(s) scheme.
///
/// `normalize_wwwroot(normalize_wwwroot(x)) == normalize_wwwroot(x)`.
pub fn normalize_wwwroot(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();

    let (scheme, rest) = if lower.starts_with("https://") {
        ("https://", &trimmed[8..])
    } else if lower.starts_with("http://") {
        ("http://", &trimmed[7..])
    } else {
        ("http://", trimmed)
    };

    let rest = rest.trim_end_matches(|c: char| c == '/' || c.is_whitespace());
    format!("{}{}", scheme, rest)
}

/// Reject anything that is not a plain absolute http(s) URL.
pub fn is_valid_wwwroot(wwwroot: &str) -> bool {
    if wwwroot.is_empty() || wwwroot.chars().any(char::is_whitespace) {
        return false;
    }

    let Ok(url) = Url::parse(wwwroot) else {
        return false;
    };

    matches!(url.scheme(), "http" | "https")
        && url.host_str().is_some_and(|h| !h.is_empty())
        && url.username().is_empty()
        && url.password().is_none()
        && url.fragment().is_none()
        && url.query().is_none()
}

/// Port the host listens on: explicit port or the scheme default.
pub fn wwwroot_port(wwwroot: &str) -> i32 {
    Url::parse(wwwroot)
        .ok()
        .and_then(|u| u.port_or_known_default())
        .map(i32::from)
        .unwrap_or(80)
}

pub fn wwwroot_host(wwwroot: &str) -> Option<String> {
    Url::parse(wwwroot)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
}
