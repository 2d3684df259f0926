mod cloudflare;
mod error;
mod gcp;
mod provider;
mod route53;

pub use cloudflare::CloudflareProvider;
pub use error::ProviderError;
pub use gcp::GcpProvider;
pub use provider::{
    normalize_name, quote_txt, unquote_txt, AcmeDnsProvider, TxtRecord, ACME_CHALLENGE_LABEL,
    DEFAULT_TXT_TTL,
};
pub use route53::Route53Provider;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::config::DnsConfig;

/// DNS vendors a provider can be selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Cloudflare,
    Gcp,
    Route53,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Cloudflare => "cloudflare",
            ProviderKind::Gcp => "gcp",
            ProviderKind::Route53 => "route53",
        }
    }

    fn section(&self) -> &'static str {
        match self {
            ProviderKind::Cloudflare => "[dns.cloudflare]",
            ProviderKind::Gcp => "[dns.gcp]",
            ProviderKind::Route53 => "[dns.route53]",
        }
    }

    fn missing(self) -> ProviderError {
        ProviderError::MissingConfig {
            provider: self.as_str(),
            section: self.section(),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_lowercase().as_str() {
            "cloudflare" => Ok(ProviderKind::Cloudflare),
            "gcp" => Ok(ProviderKind::Gcp),
            "route53" => Ok(ProviderKind::Route53),
            _ => Err(ProviderError::NoValidProvider {
                name: name.to_string(),
            }),
        }
    }
}

/// Builds the DNS-01 provider named by `config.provider` from its sub-section.
/// Nothing is sent over the network here.
pub fn create_provider(config: &DnsConfig) -> Result<Arc<dyn AcmeDnsProvider>, ProviderError> {
    let kind: ProviderKind = config.provider.parse()?;
    debug!("Selecting DNS provider {}", kind);

    match kind {
        ProviderKind::Cloudflare => {
            let cloudflare = config.cloudflare.as_ref().ok_or_else(|| kind.missing())?;
            if cloudflare.api_key.trim().is_empty() {
                return Err(ProviderError::InvalidConfig {
                    section: kind.section(),
                    field: "api_key",
                });
            }
            Ok(Arc::new(CloudflareProvider::new(cloudflare)?))
        }
        ProviderKind::Gcp => {
            let gcp = config.gcp.as_ref().ok_or_else(|| kind.missing())?;
            if gcp.project.trim().is_empty() {
                return Err(ProviderError::InvalidConfig {
                    section: kind.section(),
                    field: "project",
                });
            }
            Ok(Arc::new(GcpProvider::new(gcp)?))
        }
        ProviderKind::Route53 => {
            let route53 = config.route53.as_ref().ok_or_else(|| kind.missing())?;
            Ok(Arc::new(Route53Provider::new(route53)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CloudflareConfig, GcpConfig, Route53Config};
    use std::collections::HashMap;

    fn dns(provider: &str) -> DnsConfig {
        DnsConfig {
            provider: provider.to_string(),
            ..Default::default()
        }
    }

    fn cloudflare() -> Option<CloudflareConfig> {
        Some(CloudflareConfig {
            api_key: "cf-token".to_string(),
            endpoint: None,
        })
    }

    fn gcp() -> Option<GcpConfig> {
        Some(GcpConfig {
            project: "my-project".to_string(),
            zone_mapping: HashMap::new(),
            access_token: None,
            endpoint: None,
        })
    }

    fn route53() -> Option<Route53Config> {
        Some(Route53Config {
            max_retries: 3,
            region: None,
            profile: None,
            hosted_zone_id: None,
        })
    }

    #[test]
    fn test_selects_each_provider() {
        let config = DnsConfig {
            cloudflare: cloudflare(),
            gcp: gcp(),
            route53: route53(),
            ..dns("cloudflare")
        };
        assert_eq!(create_provider(&config).unwrap().provider_name(), "cloudflare");

        let config = DnsConfig { provider: "gcp".to_string(), ..config };
        assert_eq!(create_provider(&config).unwrap().provider_name(), "gcp");

        let config = DnsConfig { provider: "route53".to_string(), ..config };
        assert_eq!(create_provider(&config).unwrap().provider_name(), "route53");
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let config = DnsConfig {
            cloudflare: cloudflare(),
            ..dns("CloudFlare")
        };
        assert_eq!(create_provider(&config).unwrap().provider_name(), "cloudflare");

        let config = DnsConfig {
            route53: route53(),
            ..dns(" Route53 ")
        };
        assert_eq!(create_provider(&config).unwrap().provider_name(), "route53");

        assert_eq!("GCP".parse::<ProviderKind>().unwrap(), ProviderKind::Gcp);
    }

    #[test]
    fn test_missing_section_names_provider() {
        for name in ["cloudflare", "gcp", "route53"] {
            let err = create_provider(&dns(name)).err().unwrap();
            assert!(matches!(err, ProviderError::MissingConfig { .. }));
            assert!(err.to_string().contains(name), "unexpected error: {}", err);
        }
    }

    #[test]
    fn test_other_sections_are_ignored() {
        // Only the selected provider's section matters.
        let config = DnsConfig {
            cloudflare: cloudflare(),
            route53: route53(),
            ..dns("gcp")
        };
        let err = create_provider(&config).err().unwrap();
        assert!(err.to_string().contains("[dns.gcp]"));
    }

    #[test]
    fn test_unknown_provider() {
        for name in ["azure", "", "cloud flare"] {
            let err = create_provider(&dns(name)).err().unwrap();
            assert!(matches!(err, ProviderError::NoValidProvider { .. }));
            assert!(err.to_string().starts_with("no valid provider selected"));
        }
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let config = DnsConfig {
            cloudflare: Some(CloudflareConfig {
                api_key: "  ".to_string(),
                endpoint: None,
            }),
            ..dns("cloudflare")
        };
        let err = create_provider(&config).err().unwrap();
        assert!(matches!(
            err,
            ProviderError::InvalidConfig {
                field: "api_key",
                ..
            }
        ));

        let mut gcp = gcp();
        if let Some(g) = gcp.as_mut() {
            g.project.clear();
        }
        let config = DnsConfig { gcp, ..dns("gcp") };
        let err = create_provider(&config).err().unwrap();
        assert!(err.to_string().contains("project"));
    }
}
