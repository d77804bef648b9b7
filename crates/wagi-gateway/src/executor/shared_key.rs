//! Shared Key authorization for blob storage requests.
//!
//! The blob modules sign with `STORAGE_MASTER_KEY` when no SAS token is
//! configured: an HMAC-SHA256 over the verb, the standard headers, the
//! `x-ms-*` headers and the canonical resource, sent as
//! `Authorization: SharedKey <account>:<signature>`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use url::Url;
use wagi_kernel::gateway::OutboundRequest;

/// Service version stamped on signed requests.
pub const STORAGE_API_VERSION: &str = "2021-08-06";

/// Standard headers, in string-to-sign order.
const SIGNED_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

/// An account name plus its decoded access key.
#[derive(Clone)]
pub struct SharedKey {
    account: String,
    key: Vec<u8>,
}

impl SharedKey {
    /// `key` is the account key as issued, base64 encoded.
    pub fn new(account: impl Into<String>, key: &str) -> Result<Self, String> {
        let key = STANDARD
            .decode(key.trim())
            .map_err(|e| format!("STORAGE_MASTER_KEY is not valid base64: {e}"))?;
        Ok(Self {
            account: account.into(),
            key,
        })
    }

    /// Stamp `x-ms-date` and `x-ms-version`, then add the `authorization` header.
    pub fn sign(&self, request: OutboundRequest, now: DateTime<Utc>) -> Result<OutboundRequest, String> {
        let request = request
            .with_header("x-ms-date", now.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
            .with_header("x-ms-version", STORAGE_API_VERSION);
        let signature = self.signature(&self.string_to_sign(&request)?)?;
        Ok(request.with_header("authorization", format!("SharedKey {}:{signature}", self.account)))
    }

    fn signature(&self, string_to_sign: &str) -> Result<String, String> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.key).map_err(|e| e.to_string())?;
        mac.update(string_to_sign.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn string_to_sign(&self, request: &OutboundRequest) -> Result<String, String> {
        let header = |name: &str| {
            request
                .headers
                .iter()
                .rev()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.trim().to_string())
                .unwrap_or_default()
        };

        let mut lines = vec![request.method.as_str().to_string()];
        for name in SIGNED_HEADERS {
            lines.push(match name {
                // An empty body signs as an empty length, not "0".
                "content-length" if request.body.is_empty() => String::new(),
                "content-length" => request.body.len().to_string(),
                _ => header(name),
            });
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out.push_str(&canonical_headers(request));
        out.push_str(&self.canonical_resource(&request.url)?);
        Ok(out)
    }

    /// `/<account><path>` followed by one `\nname:v1,v2` line per query parameter.
    fn canonical_resource(&self, raw: &str) -> Result<String, String> {
        let url = Url::parse(raw).map_err(|e| format!("cannot sign '{raw}': {e}"))?;
        let mut resource = format!("/{}{}", self.account, url.path());

        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in url.query_pairs() {
            params.entry(name.to_lowercase()).or_default().push(value.into_owned());
        }
        for (name, mut values) in params {
            values.sort();
            resource.push('\n');
            resource.push_str(&name);
            resource.push(':');
            resource.push_str(&values.join(","));
        }
        Ok(resource)
    }
}

/// `x-ms-*` headers, lowercased and sorted, one `name:value\n` each.
fn canonical_headers(request: &OutboundRequest) -> String {
    let headers: BTreeMap<String, &str> = request
        .headers
        .iter()
        .filter(|(k, _)| k.to_ascii_lowercase().starts_with("x-ms-"))
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim()))
        .collect();
    headers.iter().map(|(k, v)| format!("{k}:{v}\n")).collect()
}
