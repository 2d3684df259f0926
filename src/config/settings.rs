use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const REDACTED: &str = "<redacted>";

/// Environment variable overriding `dns.provider`.
pub const ENV_DNS_PROVIDER: &str = "D_DNS_PROVIDER";
/// Environment variable overriding the Cloudflare API token.
pub const ENV_API_TOKEN: &str = "D_API_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dns: DnsConfig,
}

/// Effective configuration and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: DeployConfig,
    pub path: PathBuf,
    pub from_file: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_retries() -> u32 {
    5
}

/// DNS section. Only the sub-record named by `provider` is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default)]
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudflare: Option<CloudflareConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp: Option<GcpConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route53: Option<Route53Config>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CloudflareConfig {
    #[serde(alias = "api_token")]
    pub api_key: String,
    /// Overrides the Cloudflare API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GcpConfig {
    pub project: String,
    /// DNS zone name to Cloud DNS managed zone name.
    #[serde(default)]
    pub zone_mapping: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route53Config {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosted_zone_id: Option<String>,
}

// Secrets stay out of Debug output.
impl fmt::Debug for CloudflareConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudflareConfig")
            .field("api_key", &REDACTED)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl fmt::Debug for GcpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpConfig")
            .field("project", &self.project)
            .field("zone_mapping", &self.zone_mapping)
            .field("access_token", &self.access_token.as_ref().map(|_| REDACTED))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl DeployConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: DeployConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        #[cfg(unix)]
        {
            PathBuf::from("/etc/deploy-dns/config.toml")
        }
        #[cfg(windows)]
        {
            PathBuf::from(r"C:\ProgramData\deploy-dns\config.toml")
        }
    }

    /// Loads `explicit` (which must exist) or the default path (which may be
    /// absent), then applies the environment overrides from `lookup`.
    pub fn resolve<F>(explicit: Option<&Path>, lookup: F) -> Result<LoadedConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::resolve_from(explicit, &Self::default_path(), lookup)
    }

    fn resolve_from<F>(explicit: Option<&Path>, default: &Path, lookup: F) -> Result<LoadedConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (path, from_file, mut config) = match explicit {
            Some(path) => (path.to_path_buf(), true, Self::load(path)?),
            None if default.exists() => (default.to_path_buf(), true, Self::load(default)?),
            None => (default.to_path_buf(), false, Self::default()),
        };

        config.apply_overrides(lookup);

        Ok(LoadedConfig {
            config,
            path,
            from_file,
        })
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup(ENV_DNS_PROVIDER).filter(|v| !v.is_empty()) {
            self.dns.provider = provider;
        }

        if let Some(token) = lookup(ENV_API_TOKEN).filter(|v| !v.is_empty()) {
            match self.dns.cloudflare.as_mut() {
                Some(cloudflare) => cloudflare.api_key = token,
                None => {
                    self.dns.cloudflare = Some(CloudflareConfig {
                        api_key: token,
                        endpoint: None,
                    })
                }
            }
        }
    }

    /// Copy with every credential replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(cloudflare) = copy.dns.cloudflare.as_mut() {
            cloudflare.api_key = REDACTED.to_string();
        }
        if let Some(token) = copy.dns.gcp.as_mut().and_then(|gcp| gcp.access_token.as_mut()) {
            *token = REDACTED.to_string();
        }
        copy
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}
