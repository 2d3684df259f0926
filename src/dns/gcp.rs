use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::provider::{normalize_name, quote_txt, unquote_txt, AcmeDnsProvider, TxtRecord};
use crate::config::GcpConfig;

const CLOUD_DNS_API_BASE: &str = "https://dns.googleapis.com/dns/v1";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const ENV_ACCESS_TOKEN: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GcpProvider {
    client: Client,
    api_base: String,
    project: String,
    zone_mapping: HashMap<String, String>,
    access_token: Option<String>,
    token_url: String,
    // Cached for the life of the provider.
    token: OnceCell<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagedZoneList {
    #[serde(default)]
    managed_zones: Vec<ManagedZone>,
}

#[derive(Debug, Deserialize)]
struct ManagedZone {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RrsetList {
    #[serde(default)]
    rrsets: Vec<ResourceRecordSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ResourceRecordSet {
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    ttl: u32,
    rrdatas: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
struct Change {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    additions: Vec<ResourceRecordSet>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    deletions: Vec<ResourceRecordSet>,
}

impl GcpProvider {
    pub fn new(config: &GcpConfig) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let api_base = config
            .endpoint
            .as_deref()
            .unwrap_or(CLOUD_DNS_API_BASE)
            .trim_end_matches('/')
            .to_string();

        let zone_mapping = config
            .zone_mapping
            .iter()
            .map(|(zone, managed)| (normalize_name(zone), managed.clone()))
            .collect();

        Ok(Self {
            client,
            api_base,
            project: config.project.clone(),
            zone_mapping,
            access_token: config.access_token.clone(),
            token_url: METADATA_TOKEN_URL.to_string(),
            token: OnceCell::new(),
        })
    }

    async fn token(&self) -> Result<&str> {
        let token = self
            .token
            .get_or_try_init(|| async {
                let env = std::env::var(ENV_ACCESS_TOKEN).ok();
                if let Some(token) = static_token(self.access_token.as_deref(), env) {
                    return Ok(token);
                }
                self.metadata_token().await
            })
            .await?;

        Ok(token.as_str())
    }

    async fn metadata_token(&self) -> Result<String> {
        debug!("Fetching Cloud DNS access token from the metadata server");
        let token: MetadataToken = self
            .client
            .get(&self.token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("Failed to reach the GCE metadata server")?
            .error_for_status()
            .context("GCE metadata server refused the token request")?
            .json()
            .await
            .context("Failed to parse GCE metadata token")?;

        if token.access_token.trim().is_empty() {
            return Err(anyhow!("GCE metadata server returned an empty access token"));
        }
        Ok(token.access_token)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(self.token().await?)
            .send()
            .await
            .context("Failed to send request to Cloud DNS API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Cloud DNS API error ({}): {}", status, body));
        }

        response
            .json()
            .await
            .context("Failed to parse Cloud DNS API response")
    }

    fn project_url(&self) -> String {
        format!("{}/projects/{}", self.api_base, self.project)
    }

    async fn managed_zone(&self, zone: &str) -> Result<String> {
        let zone = normalize_name(zone);
        if let Some(managed) = self.zone_mapping.get(&zone) {
            return Ok(managed.clone());
        }

        let request = self
            .client
            .get(format!("{}/managedZones", self.project_url()))
            .query(&[("dnsName", format!("{}.", zone))]);
        let list: ManagedZoneList = self.send(request).await?;

        let managed = list
            .managed_zones
            .into_iter()
            .next()
            .map(|z| z.name)
            .ok_or_else(|| {
                anyhow!(
                    "No Cloud DNS managed zone for {} in project {}; add it to zone_mapping",
                    zone,
                    self.project
                )
            })?;

        debug!("Zone {} maps to managed zone {}", zone, managed);
        Ok(managed)
    }

    async fn current_rrset(&self, managed: &str, fqdn: &str) -> Result<Option<ResourceRecordSet>> {
        let request = self
            .client
            .get(format!("{}/managedZones/{}/rrsets", self.project_url(), managed))
            .query(&[("name", fqdn), ("type", "TXT")]);
        let list: RrsetList = self.send(request).await?;

        Ok(list
            .rrsets
            .into_iter()
            .find(|r| r.name.eq_ignore_ascii_case(fqdn) && r.record_type == "TXT"))
    }

    async fn apply(&self, managed: &str, change: &Change) -> Result<()> {
        let request = self
            .client
            .post(format!("{}/managedZones/{}/changes", self.project_url(), managed))
            .json(change);
        let _: serde_json::Value = self.send(request).await?;
        Ok(())
    }
}

/// Configured token first, then the environment; blank values count as unset.
fn static_token(configured: Option<&str>, env: Option<String>) -> Option<String> {
    configured
        .map(str::to_string)
        .filter(|t| !t.trim().is_empty())
        .or_else(|| env.filter(|t| !t.trim().is_empty()))
}

fn append_change(current: Option<ResourceRecordSet>, fqdn: &str, record: &TxtRecord) -> Option<Change> {
    let value = quote_txt(&record.value);
    match current {
        Some(existing) if existing.rrdatas.iter().any(|d| unquote_txt(d) == record.value) => None,
        Some(existing) => {
            let mut merged = existing.clone();
            merged.rrdatas.push(value);
            Some(Change {
                additions: vec![merged],
                deletions: vec![existing],
            })
        }
        None => Some(Change {
            additions: vec![ResourceRecordSet {
                name: fqdn.to_string(),
                record_type: "TXT".to_string(),
                ttl: record.ttl,
                rrdatas: vec![value],
            }],
            deletions: Vec::new(),
        }),
    }
}

fn delete_change(current: Option<ResourceRecordSet>, record: &TxtRecord) -> Option<Change> {
    let existing = current?;
    if !existing.rrdatas.iter().any(|d| unquote_txt(d) == record.value) {
        return None;
    }

    let mut remaining = existing.clone();
    remaining.rrdatas.retain(|d| unquote_txt(d) != record.value);

    let additions = if remaining.rrdatas.is_empty() {
        Vec::new()
    } else {
        vec![remaining]
    };

    Some(Change {
        additions,
        deletions: vec![existing],
    })
}

#[async_trait]
impl AcmeDnsProvider for GcpProvider {
    async fn append_txt_record(&self, zone: &str, record: &TxtRecord) -> Result<()> {
        let managed = self.managed_zone(zone).await?;
        let fqdn = format!("{}.", record.fqdn(zone));

        let current = self.current_rrset(&managed, &fqdn).await?;
        match append_change(current, &fqdn, record) {
            Some(change) => {
                self.apply(&managed, &change).await?;
                info!("Added TXT value to {} in managed zone {}", fqdn, managed);
            }
            None => debug!("TXT value already present on {}", fqdn),
        }

        Ok(())
    }

    async fn delete_txt_record(&self, zone: &str, record: &TxtRecord) -> Result<()> {
        let managed = self.managed_zone(zone).await?;
        let fqdn = format!("{}.", record.fqdn(zone));

        let current = self.current_rrset(&managed, &fqdn).await?;
        match delete_change(current, record) {
            Some(change) => {
                self.apply(&managed, &change).await?;
                info!("Removed TXT value from {} in managed zone {}", fqdn, managed);
            }
            None => debug!("TXT value not present on {}, nothing to delete", fqdn),
        }

        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "gcp"
    }
}
