//! Tencent Cloud DNSPod provider implementation
//!
//! Uses the DNSPod API 3.0 (`dnspod.tencentcloudapi.com`, version 2021-03-23)
//! with the same TC3 request signing as the CDN API.

use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::acme::dns::provider::{
    candidate_zones, normalize_domain, relative_record_name, DnsProviderError, DnsResult,
    CHALLENGE_TTL,
};
use crate::tencentcloud::{ApiClient, ApiError};

const SERVICE: &str = "dnspod";
const VERSION: &str = "2021-03-23";

/// Default record line; DNSPod only accepts the Chinese name
const DEFAULT_RECORD_LINE: &str = "默认";

/// Largest page DescribeDomainList allows
const DOMAIN_PAGE_SIZE: u32 = 3000;

/// DNSPod DNS provider
#[derive(Debug)]
pub struct DnspodProvider {
    api: ApiClient,
    timeout: Duration,
    /// domain -> zone name
    zone_cache: DashMap<String, String>,
}

impl DnspodProvider {
    pub fn new(secret_id: &str, secret_key: &str, timeout: Duration) -> DnsResult<Self> {
        let api = ApiClient::new(SERVICE, VERSION, None, secret_id, secret_key, timeout)
            .map_err(|e| DnsProviderError::Configuration(e.to_string()))?;
        Ok(Self::with_client(api, timeout))
    }

    /// Create a provider around a preconfigured API client
    pub fn with_client(api: ApiClient, timeout: Duration) -> Self {
        Self {
            api,
            timeout,
            zone_cache: DashMap::new(),
        }
    }

    fn map_api_error(&self, e: ApiError) -> DnsProviderError {
        match e {
            e if e.is_auth_failure() => DnsProviderError::Authentication(e.to_string()),
            ApiError::Timeout => DnsProviderError::Timeout {
                elapsed_secs: self.timeout.as_secs(),
            },
            other => DnsProviderError::ApiRequest(other.to_string()),
        }
    }

    /// Find the DNSPod zone (domain) that hosts `domain`
    async fn get_zone(&self, domain: &str) -> DnsResult<String> {
        let normalized = normalize_domain(domain);

        if let Some(zone) = self.zone_cache.get(normalized) {
            trace!(domain = %domain, zone = %zone.value(), "Zone found in cache");
            return Ok(zone.value().clone());
        }

        let response: DescribeDomainListResponse = self
            .api
            .call(
                "DescribeDomainList",
                &DescribeDomainListRequest {
                    limit: DOMAIN_PAGE_SIZE,
                },
            )
            .await
            .map_err(|e| self.map_api_error(e))?;

        let zone = candidate_zones(normalized)
            .into_iter()
            .find(|candidate| response.domain_list.iter().any(|d| d.name == *candidate))
            .ok_or_else(|| DnsProviderError::ZoneNotFound {
                domain: normalized.to_string(),
            })?
            .to_string();

        debug!(domain = %domain, zone = %zone, "Found zone for domain");
        self.zone_cache.insert(normalized.to_string(), zone.clone());
        Ok(zone)
    }

    pub async fn create_txt_record(
        &self,
        domain: &str,
        record_name: &str,
        record_value: &str,
    ) -> DnsResult<String> {
        let zone = self.get_zone(domain).await?;
        let fqdn = format!("{}.{}", record_name, normalize_domain(domain));
        let sub_domain = relative_record_name(&fqdn, &zone);

        debug!(domain = %domain, zone = %zone, sub_domain = %sub_domain, "Creating TXT record");

        let request = CreateRecordRequest {
            domain: &zone,
            sub_domain: &sub_domain,
            record_type: "TXT",
            record_line: DEFAULT_RECORD_LINE,
            value: record_value,
            ttl: CHALLENGE_TTL,
        };

        let response: CreateRecordResponse = self
            .api
            .call("CreateRecord", &request)
            .await
            .map_err(|e| match self.map_api_error(e) {
                DnsProviderError::ApiRequest(message) => DnsProviderError::RecordCreation {
                    record_name: fqdn.clone(),
                    message,
                },
                other => other,
            })?;

        debug!(record_id = response.record_id, "TXT record created successfully");
        Ok(response.record_id.to_string())
    }

    pub async fn delete_txt_record(&self, domain: &str, record_id: &str) -> DnsResult<()> {
        let zone = self.get_zone(domain).await?;
        let id: u64 = record_id.parse().map_err(|_| DnsProviderError::RecordDeletion {
            record_id: record_id.to_string(),
            message: "record id is not numeric".to_string(),
        })?;

        debug!(domain = %domain, record_id = %record_id, "Deleting TXT record");

        let result: Result<serde_json::Value, ApiError> = self
            .api
            .call(
                "DeleteRecord",
                &DeleteRecordRequest {
                    domain: &zone,
                    record_id: id,
                },
            )
            .await;

        match result {
            Ok(_) => {
                debug!(record_id = %record_id, "TXT record deleted successfully");
                Ok(())
            }
            Err(e) if e.code().is_some_and(|c| c.starts_with("ResourceNotFound")) => {
                debug!(record_id = %record_id, "Record already deleted");
                Ok(())
            }
            Err(e) => Err(match self.map_api_error(e) {
                DnsProviderError::ApiRequest(message) => DnsProviderError::RecordDeletion {
                    record_id: record_id.to_string(),
                    message,
                },
                other => other,
            }),
        }
    }
}

// DNSPod API types

#[derive(Debug, Serialize)]
struct DescribeDomainListRequest {
    #[serde(rename = "Limit")]
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct DescribeDomainListResponse {
    #[serde(rename = "DomainList", default)]
    domain_list: Vec<DomainListItem>,
}

#[derive(Debug, Deserialize)]
struct DomainListItem {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateRecordRequest<'a> {
    domain: &'a str,
    sub_domain: &'a str,
    record_type: &'static str,
    record_line: &'static str,
    value: &'a str,
    #[serde(rename = "TTL")]
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    #[serde(rename = "RecordId")]
    record_id: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteRecordRequest<'a> {
    domain: &'a str,
    record_id: u64,
}
