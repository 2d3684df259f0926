use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::provider::{normalize_name, AcmeDnsProvider, TxtRecord};
use crate::config::CloudflareConfig;

const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CloudflareProvider {
    client: Client,
    api_base: String,
    api_token: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RecordId {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
}

impl CloudflareProvider {
    pub fn new(config: &CloudflareConfig) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let api_base = config
            .endpoint
            .as_deref()
            .unwrap_or(CLOUDFLARE_API_BASE)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            api_base,
            api_token: config.api_key.clone(),
        })
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_token)
    }

    async fn zone_id(&self, zone: &str) -> Result<String> {
        let zone = normalize_name(zone);
        let response = self
            .client
            .get(format!("{}/zones", self.api_base))
            .header("Authorization", self.auth_header())
            .query(&[("name", zone.as_str())])
            .send()
            .await
            .context("Failed to send zone lookup to Cloudflare API")?;

        let zones: Vec<Zone> = parse_envelope(response).await?;
        let id = zones
            .into_iter()
            .next()
            .map(|z| z.id)
            .ok_or_else(|| anyhow!("Cloudflare zone not found: {}", zone))?;

        debug!("Cloudflare zone {} has id {}", zone, id);
        Ok(id)
    }

    /// TXT records named `fqdn` whose content is exactly `value`.
    async fn find_records(&self, zone_id: &str, fqdn: &str, value: &str) -> Result<Vec<RecordId>> {
        let response = self
            .client
            .get(format!("{}/zones/{}/dns_records", self.api_base, zone_id))
            .header("Authorization", self.auth_header())
            .query(&[("type", "TXT"), ("name", fqdn), ("content", value)])
            .send()
            .await
            .context("Failed to send record lookup to Cloudflare API")?;

        parse_envelope(response).await
    }
}

async fn parse_envelope<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let envelope: Envelope<T> = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(anyhow!("Cloudflare API error ({}): {}", status, body));
        }
        Err(e) => return Err(e).context("Failed to parse Cloudflare API response"),
    };

    if !status.is_success() || !envelope.success {
        let errors: Vec<String> = envelope
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect();
        return Err(anyhow!(
            "Cloudflare API error ({}): {}",
            status,
            errors.join(", ")
        ));
    }

    envelope
        .result
        .ok_or_else(|| anyhow!("Cloudflare API returned success without a result"))
}

#[async_trait]
impl AcmeDnsProvider for CloudflareProvider {
    async fn append_txt_record(&self, zone: &str, record: &TxtRecord) -> Result<()> {
        let zone_id = self.zone_id(zone).await?;
        let fqdn = record.fqdn(zone);

        // Cloudflare rejects an identical record (81058), so an existing value is success.
        if !self.find_records(&zone_id, &fqdn, &record.value).await?.is_empty() {
            debug!("TXT value already present on {}", fqdn);
            return Ok(());
        }

        let payload = CreateRecord {
            record_type: "TXT",
            name: &fqdn,
            content: &record.value,
            ttl: record.ttl,
        };

        let response = self
            .client
            .post(format!("{}/zones/{}/dns_records", self.api_base, zone_id))
            .header("Authorization", self.auth_header())
            .json(&payload)
            .send()
            .await
            .context("Failed to send create request to Cloudflare API")?;

        let created: RecordId = parse_envelope(response).await?;
        info!("Created TXT record {} ({})", fqdn, created.id);
        Ok(())
    }

    async fn delete_txt_record(&self, zone: &str, record: &TxtRecord) -> Result<()> {
        let zone_id = self.zone_id(zone).await?;
        let fqdn = record.fqdn(zone);
        let records_url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);

        let matches = self.find_records(&zone_id, &fqdn, &record.value).await?;
        if matches.is_empty() {
            debug!("No TXT record {} with the given value, nothing to delete", fqdn);
            return Ok(());
        }

        for found in matches {
            let response = self
                .client
                .delete(format!("{}/{}", records_url, found.id))
                .header("Authorization", self.auth_header())
                .send()
                .await
                .context("Failed to send delete request to Cloudflare API")?;

            let _: RecordId = parse_envelope(response).await?;
            info!("Deleted TXT record {} ({})", fqdn, found.id);
        }

        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> CloudflareProvider {
        CloudflareProvider::new(&CloudflareConfig {
            api_key: "test_token".to_string(),
            endpoint: Some(format!("{}/", server.uri())),
        })
        .unwrap()
    }

    async fn mount_zone(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/zones"))
            .and(query_param("name", "example.com"))
            .and(header("Authorization", "Bearer test_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": [{ "id": "zone123", "name": "example.com" }]
            })))
            .mount(server)
            .await;
    }

    async fn mount_lookup(server: &MockServer, fqdn: &str, result: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/zones/zone123/dns_records"))
            .and(query_param("type", "TXT"))
            .and(query_param("name", fqdn))
            .and(query_param("content", "challenge-value"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": result
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_auth_header() {
        let provider = CloudflareProvider::new(&CloudflareConfig {
            api_key: "test_token".to_string(),
            endpoint: None,
        })
        .unwrap();

        assert_eq!(provider.auth_header(), "Bearer test_token");
        assert_eq!(provider.api_base, CLOUDFLARE_API_BASE);
    }

    #[test]
    fn test_create_record_serialization() {
        let payload = CreateRecord {
            record_type: "TXT",
            name: "_acme-challenge.example.com",
            content: "abc",
            ttl: 120,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "TXT");
        assert_eq!(json["name"], "_acme-challenge.example.com");
        assert_eq!(json["ttl"], 120);
    }

    #[tokio::test]
    async fn test_append_creates_record_in_zone() {
        let server = MockServer::start().await;
        mount_zone(&server).await;
        mount_lookup(&server, "_acme-challenge.www.example.com", json!([])).await;

        Mock::given(method("POST"))
            .and(path("/zones/zone123/dns_records"))
            .and(body_partial_json(json!({
                "type": "TXT",
                "name": "_acme-challenge.www.example.com",
                "content": "challenge-value"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": { "id": "rec1" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let record = TxtRecord::challenge("www.example.com", "example.com", "challenge-value").unwrap();
        provider.append_txt_record("example.com.", &record).await.unwrap();
    }

    #[tokio::test]
    async fn test_append_existing_value_is_noop() {
        let server = MockServer::start().await;
        mount_zone(&server).await;
        mount_lookup(&server, "_acme-challenge.www.example.com", json!([{ "id": "rec1" }])).await;

        Mock::given(method("POST"))
            .and(path("/zones/zone123/dns_records"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "errors": [{ "code": 81058, "message": "An identical record already exists." }],
                "result": null
            })))
            .expect(0)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let record = TxtRecord::challenge("WWW.Example.com", "Example.com", "challenge-value").unwrap();
        provider.append_txt_record("Example.com", &record).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_removes_matching_records() {
        let server = MockServer::start().await;
        mount_zone(&server).await;
        mount_lookup(&server, "_acme-challenge.example.com", json!([{ "id": "rec1" }])).await;

        Mock::given(method("DELETE"))
            .and(path("/zones/zone123/dns_records/rec1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": { "id": "rec1" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let record = TxtRecord::challenge("example.com", "example.com", "challenge-value").unwrap();
        provider.delete_txt_record("example.com", &record).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_value_is_noop() {
        let server = MockServer::start().await;
        mount_zone(&server).await;
        mount_lookup(&server, "_acme-challenge.example.com", json!([])).await;

        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let record = TxtRecord::challenge("example.com", "example.com", "challenge-value").unwrap();
        provider.delete_txt_record("example.com", &record).await.unwrap();
    }

    #[tokio::test]
    async fn test_api_errors_are_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/zones"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "success": false,
                "errors": [{ "code": 9109, "message": "Invalid access token" }],
                "result": null
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let record = TxtRecord::new("_acme-challenge", "v", 120);
        let err = provider
            .append_txt_record("example.com", &record)
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("9109"), "unexpected error: {}", message);
        assert!(message.contains("Invalid access token"));
    }

    #[tokio::test]
    async fn test_unknown_zone() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/zones"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": []
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let record = TxtRecord::new("_acme-challenge", "v", 120);
        let err = provider
            .append_txt_record("missing.org", &record)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing.org"));
    }
}
