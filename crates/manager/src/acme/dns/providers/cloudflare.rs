//! Cloudflare DNS provider implementation
//!
//! Uses the Cloudflare v4 API with a scoped API token (`Zone.DNS:Edit`).
//! API documentation: <https://developers.cloudflare.com/api/resources/dns/>

use std::time::Duration;

use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::acme::dns::provider::{
    candidate_zones, normalize_domain, DnsProviderError, DnsResult, CHALLENGE_TTL,
};

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Cloudflare DNS provider
#[derive(Debug)]
pub struct CloudflareProvider {
    client: Client,
    base_url: String,
    token: String,
    timeout: Duration,
    /// domain -> zone id
    zone_cache: DashMap<String, String>,
}

impl CloudflareProvider {
    pub fn new(token: &str, timeout: Duration) -> DnsResult<Self> {
        Self::with_base_url(token, timeout, CLOUDFLARE_API_BASE)
    }

    /// Create a provider against another API base, e.g. a mock server
    pub fn with_base_url(token: &str, timeout: Duration, base_url: &str) -> DnsResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            DnsProviderError::Configuration(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            timeout,
            zone_cache: DashMap::new(),
        })
    }

    fn map_send_error(&self, context: &str, e: reqwest::Error) -> DnsProviderError {
        if e.is_timeout() {
            DnsProviderError::Timeout {
                elapsed_secs: self.timeout.as_secs(),
            }
        } else {
            DnsProviderError::ApiRequest(format!("{}: {}", context, e))
        }
    }

    /// Decode the `{success, errors, result}` envelope
    async fn decode<T: DeserializeOwned>(
        &self,
        context: &str,
        response: reqwest::Response,
    ) -> DnsResult<T> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DnsProviderError::Authentication(
                "Cloudflare rejected the API token".to_string(),
            ));
        }

        let body = response.text().await.unwrap_or_default();
        let envelope: ApiResponse<T> = serde_json::from_str(&body).map_err(|e| {
            DnsProviderError::ApiRequest(format!(
                "{}: HTTP {} with unreadable body ({}): {}",
                context, status, e, body
            ))
        })?;

        if !status.is_success() || !envelope.success {
            let messages: Vec<String> = envelope
                .errors
                .iter()
                .map(|e| format!("{} ({})", e.message, e.code))
                .collect();
            return Err(DnsProviderError::ApiRequest(format!(
                "{}: HTTP {} - {}",
                context,
                status,
                messages.join("; ")
            )));
        }

        envelope.result.ok_or_else(|| {
            DnsProviderError::ApiRequest(format!("{}: response has no result", context))
        })
    }

    /// Get the zone ID for a domain, walking up to parent domains
    async fn get_zone_id(&self, domain: &str) -> DnsResult<String> {
        let normalized = normalize_domain(domain);

        if let Some(zone_id) = self.zone_cache.get(normalized) {
            trace!(domain = %domain, zone_id = %zone_id.value(), "Zone ID found in cache");
            return Ok(zone_id.value().clone());
        }

        for candidate in candidate_zones(normalized) {
            let response = self
                .client
                .get(format!("{}/zones", self.base_url))
                .bearer_auth(&self.token)
                .query(&[("name", candidate)])
                .send()
                .await
                .map_err(|e| self.map_send_error("Failed to list zones", e))?;

            let zones: Vec<Zone> = self.decode("Failed to list zones", response).await?;
            if let Some(zone) = zones.into_iter().find(|z| z.name == candidate) {
                debug!(domain = %domain, zone_id = %zone.id, zone_name = %zone.name, "Found zone for domain");
                self.zone_cache.insert(normalized.to_string(), zone.id.clone());
                return Ok(zone.id);
            }
        }

        Err(DnsProviderError::ZoneNotFound {
            domain: normalized.to_string(),
        })
    }

    pub async fn create_txt_record(
        &self,
        domain: &str,
        record_name: &str,
        record_value: &str,
    ) -> DnsResult<String> {
        let zone_id = self.get_zone_id(domain).await?;
        let fqdn = format!("{}.{}", record_name, normalize_domain(domain));

        debug!(domain = %domain, zone_id = %zone_id, record = %fqdn, "Creating TXT record");

        let request = CreateRecordRequest {
            r#type: "TXT",
            name: &fqdn,
            content: record_value,
            ttl: CHALLENGE_TTL,
        };

        let response = self
            .client
            .post(format!("{}/zones/{}/dns_records", self.base_url, zone_id))
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error("Failed to create record", e))?;

        let record: Record = self
            .decode("Failed to create record", response)
            .await
            .map_err(|e| match e {
                DnsProviderError::ApiRequest(message) => DnsProviderError::RecordCreation {
                    record_name: fqdn.clone(),
                    message,
                },
                other => other,
            })?;

        debug!(record_id = %record.id, "TXT record created successfully");
        Ok(record.id)
    }

    pub async fn delete_txt_record(&self, domain: &str, record_id: &str) -> DnsResult<()> {
        let zone_id = self.get_zone_id(domain).await?;

        debug!(domain = %domain, record_id = %record_id, "Deleting TXT record");

        let response = self
            .client
            .delete(format!("{}/zones/{}/dns_records/{}", self.base_url, zone_id, record_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| self.map_send_error("Failed to delete record", e))?;

        // 404 is fine - record might already be deleted
        if response.status() == StatusCode::NOT_FOUND {
            debug!(record_id = %record_id, "Record already deleted");
            return Ok(());
        }

        self.decode::<serde_json::Value>("Failed to delete record", response)
            .await
            .map_err(|e| match e {
                DnsProviderError::ApiRequest(message) => DnsProviderError::RecordDeletion {
                    record_id: record_id.to_string(),
                    message,
                },
                other => other,
            })?;

        debug!(record_id = %record_id, "TXT record deleted successfully");
        Ok(())
    }
}

// Cloudflare API types

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    r#type: &'static str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: String,
}
