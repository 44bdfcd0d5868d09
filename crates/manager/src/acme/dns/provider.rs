//! DNS providers for DNS-01 challenges

use std::time::Duration;

use cdn_cert_manager_config::DnsProviderSettings;
use thiserror::Error;

use super::providers::{CloudflareProvider, DnspodProvider};

/// Result type for DNS operations
pub type DnsResult<T> = Result<T, DnsProviderError>;

/// Errors that can occur during DNS provider operations
#[derive(Debug, Error)]
pub enum DnsProviderError {
    /// Authentication failed with the DNS provider
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Zone not found for the domain
    #[error("Zone not found for domain '{domain}'")]
    ZoneNotFound { domain: String },

    /// Record creation failed
    #[error("Failed to create TXT record for '{record_name}': {message}")]
    RecordCreation { record_name: String, message: String },

    /// Record deletion failed
    #[error("Failed to delete TXT record '{record_id}': {message}")]
    RecordDeletion { record_id: String, message: String },

    /// API request failed
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Request or propagation timeout
    #[error("Timed out after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

/// ACME challenge record name prefix
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// TTL for challenge records
pub const CHALLENGE_TTL: u32 = 600;

/// Timeout for provider API calls
pub const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Strip a wildcard prefix
pub fn normalize_domain(domain: &str) -> &str {
    domain.strip_prefix("*.").unwrap_or(domain)
}

/// `_acme-challenge.<domain>`
pub fn challenge_record_fqdn(domain: &str) -> String {
    format!("{}.{}", ACME_CHALLENGE_RECORD, normalize_domain(domain))
}

/// Name of `fqdn` relative to `zone`, `@` for the apex
pub fn relative_record_name(fqdn: &str, zone: &str) -> String {
    if fqdn == zone {
        "@".to_string()
    } else if let Some(stripped) = fqdn.strip_suffix(&format!(".{}", zone)) {
        stripped.to_string()
    } else {
        fqdn.to_string()
    }
}

/// Candidate zones for a domain, most specific first
///
/// `a.b.example.com` yields `a.b.example.com`, `b.example.com`, `example.com`.
pub fn candidate_zones(domain: &str) -> Vec<&str> {
    let domain = normalize_domain(domain);
    let mut candidates = vec![domain];
    let mut current = domain;
    while let Some(pos) = current.find('.') {
        current = &current[pos + 1..];
        if current.contains('.') {
            candidates.push(current);
        }
    }
    candidates
}

/// The DNS provider selected at startup
#[derive(Debug)]
pub enum DnsProvider {
    Cloudflare(CloudflareProvider),
    TencentCloud(DnspodProvider),
}

impl DnsProvider {
    /// Build the configured provider
    pub fn from_settings(settings: &DnsProviderSettings) -> DnsResult<Self> {
        match settings {
            DnsProviderSettings::Cloudflare { api_token } => Ok(DnsProvider::Cloudflare(
                CloudflareProvider::new(api_token.expose(), API_TIMEOUT)?,
            )),
            DnsProviderSettings::TencentCloud {
                secret_id,
                secret_key,
            } => Ok(DnsProvider::TencentCloud(DnspodProvider::new(
                secret_id,
                secret_key.expose(),
                API_TIMEOUT,
            )?)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DnsProvider::Cloudflare(_) => "cloudflare",
            DnsProvider::TencentCloud(_) => "tencentcloud",
        }
    }

    /// Create `<record_name>.<domain>` TXT and return an id for cleanup
    pub async fn create_txt_record(
        &self,
        domain: &str,
        record_name: &str,
        record_value: &str,
    ) -> DnsResult<String> {
        match self {
            DnsProvider::Cloudflare(p) => p.create_txt_record(domain, record_name, record_value).await,
            DnsProvider::TencentCloud(p) => {
                p.create_txt_record(domain, record_name, record_value).await
            }
        }
    }

    /// Delete a record created by [`Self::create_txt_record`]; missing records are not an error
    pub async fn delete_txt_record(&self, domain: &str, record_id: &str) -> DnsResult<()> {
        match self {
            DnsProvider::Cloudflare(p) => p.delete_txt_record(domain, record_id).await,
            DnsProvider::TencentCloud(p) => p.delete_txt_record(domain, record_id).await,
        }
    }
}
