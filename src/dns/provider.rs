use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// Label prefix for DNS-01 validation records.
pub const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

pub const DEFAULT_TXT_TTL: u32 = 120;

/// A TXT record whose `name` is relative to the zone it lives in (`@` for the apex).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord {
    pub name: String,
    pub value: String,
    pub ttl: u32,
}

impl TxtRecord {
    pub fn new(name: &str, value: &str, ttl: u32) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            ttl,
        }
    }

    /// Builds the `_acme-challenge` record proving control of `domain`, placed in `zone`.
    pub fn challenge(domain: &str, zone: &str, value: &str) -> Result<Self> {
        let domain = normalize_name(domain);
        let zone = normalize_name(zone);

        let name = if domain == zone {
            ACME_CHALLENGE_LABEL.to_string()
        } else {
            let subdomain = domain
                .strip_suffix(&format!(".{}", zone))
                .ok_or_else(|| anyhow!("Domain {} is not inside zone {}", domain, zone))?;
            format!("{}.{}", ACME_CHALLENGE_LABEL, subdomain)
        };

        Ok(Self::new(&name, value, DEFAULT_TXT_TTL))
    }

    /// Fully qualified, lowercased name without the trailing dot.
    pub fn fqdn(&self, zone: &str) -> String {
        let zone = normalize_name(zone);
        let name = normalize_name(&self.name);
        match name.as_str() {
            "" | "@" => zone,
            n if n == zone || n.ends_with(&format!(".{}", zone)) => n.to_string(),
            n => format!("{}.{}", n, zone),
        }
    }
}

/// DNS names compare case-insensitively: lowercase, trim whitespace and the root dot.
pub fn normalize_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// TXT character-strings are stored quoted by Cloud DNS and Route53.
pub fn quote_txt(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value.to_string()
    } else {
        format!("\"{}\"", value)
    }
}

pub fn unquote_txt(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// The capability an ACME client needs to answer DNS-01 challenges.
#[async_trait]
pub trait AcmeDnsProvider: Send + Sync {
    /// Add a TXT value under `record.name` in `zone`, keeping existing values
    async fn append_txt_record(&self, zone: &str, record: &TxtRecord) -> Result<()>;

    /// Remove a TXT value; removing a value that is not present succeeds
    async fn delete_txt_record(&self, zone: &str, record: &TxtRecord) -> Result<()>;

    /// Get the provider name
    fn provider_name(&self) -> &'static str;
}
