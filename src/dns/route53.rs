use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_route53::config::Region;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use aws_sdk_route53::Client;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::provider::{normalize_name, quote_txt, unquote_txt, AcmeDnsProvider, TxtRecord};
use crate::config::Route53Config;

/// Route53 provider. The SDK client is built on first use so that
/// constructing the provider never touches the network or credential chain.
pub struct Route53Provider {
    max_retries: u32,
    region: Option<String>,
    profile: Option<String>,
    hosted_zone_id: Option<String>,
    client: OnceCell<Client>,
}

impl Route53Provider {
    pub fn new(config: &Route53Config) -> Self {
        Self {
            max_retries: config.max_retries,
            region: config.region.clone(),
            profile: config.profile.clone(),
            hosted_zone_id: config.hosted_zone_id.clone(),
            client: OnceCell::new(),
        }
    }

    #[cfg(test)]
    fn with_client(config: &Route53Config, client: Client) -> Self {
        Self {
            client: OnceCell::new_with(Some(client)),
            ..Self::new(config)
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn retry_config(&self) -> RetryConfig {
        // Attempts include the initial request.
        RetryConfig::standard().with_max_attempts(self.max_retries.saturating_add(1))
    }

    async fn client(&self) -> &Client {
        self.client
            .get_or_init(|| async {
                let mut loader =
                    aws_config::defaults(BehaviorVersion::latest()).retry_config(self.retry_config());
                if let Some(region) = &self.region {
                    loader = loader.region(Region::new(region.clone()));
                }
                if let Some(profile) = &self.profile {
                    loader = loader.profile_name(profile);
                }
                let sdk_config = loader.load().await;
                debug!("Route53 client initialised with max_retries={}", self.max_retries);
                Client::new(&sdk_config)
            })
            .await
    }

    async fn hosted_zone_id(&self, zone: &str) -> Result<String> {
        if let Some(id) = &self.hosted_zone_id {
            return Ok(id.clone());
        }

        let zone = normalize_name(zone);
        let output = self
            .client()
            .await
            .list_hosted_zones_by_name()
            .dns_name(&zone)
            .send()
            .await
            .with_context(|| format!("Failed to look up Route53 hosted zone for {}", zone))?;

        output
            .hosted_zones()
            .iter()
            .find(|hz| normalize_name(hz.name()) == zone)
            .map(|hz| hz.id().to_string())
            .ok_or_else(|| anyhow!("Route53 hosted zone not found: {}", zone))
    }

    async fn current_values(&self, zone_id: &str, fqdn: &str) -> Result<Option<(i64, Vec<String>)>> {
        let output = self
            .client()
            .await
            .list_resource_record_sets()
            .hosted_zone_id(zone_id)
            .start_record_name(fqdn)
            .start_record_type(RrType::Txt)
            .send()
            .await
            .with_context(|| format!("Failed to list Route53 records for {}", fqdn))?;

        Ok(output
            .resource_record_sets()
            .iter()
            .find(|rrs| normalize_name(rrs.name()) == normalize_name(fqdn) && *rrs.r#type() == RrType::Txt)
            .map(|rrs| {
                let values = rrs
                    .resource_records()
                    .iter()
                    .map(|rr| rr.value().to_string())
                    .collect();
                (rrs.ttl().unwrap_or_default(), values)
            }))
    }

    async fn submit(
        &self,
        zone_id: &str,
        action: ChangeAction,
        fqdn: &str,
        ttl: i64,
        values: &[String],
    ) -> Result<()> {
        let records = values
            .iter()
            .map(|v| ResourceRecord::builder().value(v.as_str()).build())
            .collect::<Result<Vec<_>, _>>()?;

        let record_set = ResourceRecordSet::builder()
            .name(fqdn)
            .r#type(RrType::Txt)
            .ttl(ttl)
            .set_resource_records(Some(records))
            .build()?;

        let batch = ChangeBatch::builder()
            .comment("ACME DNS-01 challenge")
            .changes(
                Change::builder()
                    .action(action)
                    .resource_record_set(record_set)
                    .build()?,
            )
            .build()?;

        self.client()
            .await
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(batch)
            .send()
            .await
            .with_context(|| format!("Failed to change Route53 record {}", fqdn))?;

        Ok(())
    }
}

/// Values after appending, or `None` when the value is already present.
fn merged_values(current: &[String], value: &str) -> Option<Vec<String>> {
    if current.iter().any(|v| unquote_txt(v) == value) {
        return None;
    }
    let mut merged = current.to_vec();
    merged.push(quote_txt(value));
    Some(merged)
}

/// Values after removal, or `None` when the value is absent.
fn remaining_values(current: &[String], value: &str) -> Option<Vec<String>> {
    if !current.iter().any(|v| unquote_txt(v) == value) {
        return None;
    }
    Some(
        current
            .iter()
            .filter(|v| unquote_txt(v) != value)
            .cloned()
            .collect(),
    )
}

#[async_trait]
impl AcmeDnsProvider for Route53Provider {
    async fn append_txt_record(&self, zone: &str, record: &TxtRecord) -> Result<()> {
        let zone_id = self.hosted_zone_id(zone).await?;
        let fqdn = format!("{}.", record.fqdn(zone));

        let current = self.current_values(&zone_id, &fqdn).await?;
        let existing = current.as_ref().map(|(_, v)| v.as_slice()).unwrap_or_default();

        match merged_values(existing, &record.value) {
            Some(values) => {
                self.submit(&zone_id, ChangeAction::Upsert, &fqdn, i64::from(record.ttl), &values)
                    .await?;
                info!("Upserted TXT record {} in hosted zone {}", fqdn, zone_id);
            }
            None => debug!("TXT value already present on {}", fqdn),
        }

        Ok(())
    }

    async fn delete_txt_record(&self, zone: &str, record: &TxtRecord) -> Result<()> {
        let zone_id = self.hosted_zone_id(zone).await?;
        let fqdn = format!("{}.", record.fqdn(zone));

        let Some((ttl, current)) = self.current_values(&zone_id, &fqdn).await? else {
            debug!("No TXT record {}, nothing to delete", fqdn);
            return Ok(());
        };

        match remaining_values(&current, &record.value) {
            Some(remaining) if remaining.is_empty() => {
                // DELETE must name the rrset exactly as it exists.
                self.submit(&zone_id, ChangeAction::Delete, &fqdn, ttl, &current)
                    .await?;
                info!("Deleted TXT record {} from hosted zone {}", fqdn, zone_id);
            }
            Some(remaining) => {
                self.submit(&zone_id, ChangeAction::Upsert, &fqdn, ttl, &remaining)
                    .await?;
                info!("Removed TXT value from {} in hosted zone {}", fqdn, zone_id);
            }
            None => debug!("TXT value not present on {}, nothing to delete", fqdn),
        }

        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "route53"
    }
}
