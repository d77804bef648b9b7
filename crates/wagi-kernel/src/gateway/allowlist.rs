//! Outbound allowlist matching.
//!
//! An [`AllowList`] is the set of destinations a module may reach. Matching is
//! on scheme + host (+ port when the entry names one); path, query and
//! userinfo never participate. Scheme and host compare case-insensitively.
//!
//! An empty allowlist denies every target. A target URL that fails to parse
//! is denied, never reported as an error.

use super::error::GatewayError;
use serde::Serialize;
use std::fmt;
use url::Url;

/// One parsed `AllowedHosts` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowedHost {
    scheme: String,
    host: String,
    /// Only set when the entry spelled out a port.
    port: Option<u16>,
}

impl AllowedHost {
    /// Parse an entry such as `https://acct.blob.core.windows.net` or
    /// `http://127.0.0.1:10000`. Only `http` and `https` are accepted.
    pub fn parse(entry: &str) -> Option<Self> {
        let url = Url::parse(entry.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?.to_ascii_lowercase();
        let port = if has_explicit_port(entry) {
            url.port_or_known_default()
        } else {
            None
        };
        Some(Self {
            scheme: url.scheme().to_string(),
            host,
            port,
        })
    }

    /// Whether `target` falls under this entry.
    fn permits(&self, target: &Url) -> bool {
        if target.scheme() != self.scheme {
            return false;
        }
        let Some(host) = target.host_str() else {
            return false;
        };
        if !host.eq_ignore_ascii_case(&self.host) {
            return false;
        }
        match self.port {
            Some(port) => target.port_or_known_default() == Some(port),
            None => true,
        }
    }
}

impl fmt::Display for AllowedHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.scheme, self.host, port),
            None => write!(f, "{}://{}", self.scheme, self.host),
        }
    }
}

/// The set of outbound destinations permitted to one module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllowList {
    entries: Vec<AllowedHost>,
}

impl AllowList {
    /// An allowlist that denies everything.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Parse every declared entry for `route_id`.
    ///
    /// Returns [`GatewayError::InvalidAllowedHost`] for the first entry that is
    /// not an absolute http(s) URL with a host.
    pub fn parse(route_id: &str, entries: &[String]) -> Result<Self, GatewayError> {
        let entries = entries
            .iter()
            .map(|raw| {
                AllowedHost::parse(raw).ok_or_else(|| {
                    GatewayError::InvalidAllowedHost(route_id.to_string(), raw.clone())
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[AllowedHost] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// See [`is_allowed`].
    pub fn allows(&self, target_url: &str) -> bool {
        is_allowed(self, target_url)
    }
}

/// Decide whether `target_url` is permitted by `allowlist`.
///
/// Pure and lock-free; safe to call concurrently from any number of requests.
pub fn is_allowed(allowlist: &AllowList, target_url: &str) -> bool {
    if allowlist.entries.is_empty() {
        return false;
    }
    let Ok(target) = Url::parse(target_url) else {
        return false;
    };
    allowlist.entries.iter().any(|entry| entry.permits(&target))
}

/// Whether the authority section of `raw` carries a `:port` suffix.
///
/// `Url` normalises a default port away (`https://h:443` reports no port), so
/// the raw text is inspected to tell "no port" from "the default port".
fn has_explicit_port(raw: &str) -> bool {
    let Some((_, rest)) = raw.trim().split_once("://") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let after_host = match host_port.rfind(']') {
        Some(idx) => &host_port[idx + 1..],
        None => host_port,
    };
    after_host
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> AllowList {
        let owned: Vec<String> = entries.iter().map(|s| s.to_string()).collect();
        AllowList::parse("test", &owned).unwrap()
    }

    #[test]
    fn empty_allowlist_denies_everything() {
        let empty = AllowList::deny_all();
        assert!(!is_allowed(&empty, "https://acct.blob.core.windows.net/c/b"));
        assert!(!is_allowed(&empty, "http://localhost/"));
    }

    #[test]
    fn exact_host_matches_any_path_and_query() {
        let allow = list(&["https://acct.blob.core.windows.net"]);
        assert!(allow.allows("https://acct.blob.core.windows.net/wagitest/blob-1"));
        assert!(allow.allows("https://acct.blob.core.windows.net/?comp=list"));
        assert!(allow.allows("https://acct.blob.core.windows.net"));
    }

    #[test]
    fn scheme_and_host_compare_case_insensitively() {
        let allow = list(&["HTTPS://Acct.Blob.Core.Windows.Net"]);
        assert!(allow.allows("https://ACCT.blob.core.windows.net/x"));
    }

    #[test]
    fn different_scheme_is_denied() {
        let allow = list(&["https://acct.blob.core.windows.net"]);
        assert!(!allow.allows("http://acct.blob.core.windows.net/x"));
    }

    #[test]
    fn other_hosts_and_subdomains_are_denied() {
        let allow = list(&["https://acct.blob.core.windows.net"]);
        assert!(!allow.allows("https://other.blob.core.windows.net/x"));
        assert!(!allow.allows("https://evil.acct.blob.core.windows.net/x"));
        assert!(!allow.allows("https://acct.blob.core.windows.net.evil.com/x"));
    }

    #[test]
    fn entry_without_port_accepts_any_port() {
        let allow = list(&["http://localhost"]);
        assert!(allow.allows("http://localhost:10000/devstoreaccount1"));
        assert!(allow.allows("http://localhost/"));
    }

    #[test]
    fn entry_with_port_requires_that_port() {
        let allow = list(&["http://127.0.0.1:10000"]);
        assert!(allow.allows("http://127.0.0.1:10000/a"));
        assert!(!allow.allows("http://127.0.0.1:10001/a"));
        assert!(!allow.allows("http://127.0.0.1/a"));
    }

    #[test]
    fn explicit_default_port_is_pinned() {
        let allow = list(&["https://example.com:443"]);
        assert!(allow.allows("https://example.com/a"));
        assert!(allow.allows("https://example.com:443/a"));
        assert!(!allow.allows("https://example.com:8443/a"));
    }

    #[test]
    fn malformed_target_is_denied() {
        let allow = list(&["https://example.com"]);
        assert!(!allow.allows("not a url"));
        assert!(!allow.allows("/relative/path"));
        assert!(!allow.allows(""));
    }

    #[test]
    fn userinfo_does_not_affect_matching() {
        let allow = list(&["https://example.com"]);
        assert!(allow.allows("https://user:pw@example.com/a"));
        assert!(!allow.allows("https://example.com@evil.com/a"));
    }

    #[test]
    fn invalid_entries_are_rejected_at_parse() {
        let bad = vec!["ftp://example.com".to_string()];
        assert!(matches!(
            AllowList::parse("r", &bad),
            Err(GatewayError::InvalidAllowedHost(ref id, ref entry)) if id == "r" && entry == "ftp://example.com"
        ));
        let bad = vec!["example.com".to_string()];
        assert!(AllowList::parse("r", &bad).is_err());
    }

    #[test]
    fn explicit_port_detection() {
        assert!(has_explicit_port("http://h:80"));
        assert!(has_explicit_port("http://u:p@h:8080/x"));
        assert!(has_explicit_port("http://[::1]:9000"));
        assert!(!has_explicit_port("http://[::1]"));
        assert!(!has_explicit_port("http://u:p@h/x"));
        assert!(!has_explicit_port("https://h/path:80"));
    }
}
