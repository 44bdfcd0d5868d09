//! CDN HTTPS state
//!
//! [`CdnControlPlane`] is the narrow view of the CDN API the lifecycle needs:
//! read a domain's HTTPS configuration and replace its certificate.
//! [`CdnState`] turns that into the [`TlsState`] the scheduler decides on and
//! uploads issued bundles.

mod state;
mod tencent;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use state::{
    parse_expire_time, CdnState, Expiry, TlsState, CERTIFICATE_ISSUER, EXPIRE_TIME_FORMAT,
    UPLOAD_MESSAGE,
};
pub use tencent::TencentCdnClient;

/// Errors raised while reading or updating CDN state
#[derive(Debug, Error)]
pub enum CdnError {
    /// The CDN does not serve the domain
    #[error("Domain '{0}' is not configured on the CDN")]
    DomainNotFound(String),

    /// Network or API failure; the next cycle may succeed
    #[error("CDN request failed: {0}")]
    Transient(String),

    /// The CDN rejected the certificate upload
    #[error("Failed to upload certificate for '{domain}': {message}")]
    Upload { domain: String, message: String },

    /// The CDN API rejected the credentials
    #[error("CDN credentials rejected: {0}")]
    Credentials(String),

    /// The certificate to upload has no readable expiry
    #[error("Failed to read certificate expiry: {0}")]
    CertificateParse(String),

    /// The CDN client could not be constructed
    #[error("Invalid CDN client configuration: {0}")]
    Configuration(String),
}

/// Certificate currently deployed for a domain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployedCertificate {
    pub cert_id: Option<String>,
    /// Raw expiry as reported by the CDN
    pub expire_time: Option<String>,
}

/// HTTPS configuration of one CDN domain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpsConfig {
    /// HTTPS switch
    pub enabled: bool,
    pub certificate: Option<DeployedCertificate>,
}

/// Certificate upload for one domain
#[derive(Clone, PartialEq, Eq)]
pub struct HttpsUpdate {
    pub certificate_pem: String,
    pub private_key_pem: String,
    pub expires_at: DateTime<Utc>,
    pub issuer: String,
    pub message: String,
}

impl std::fmt::Debug for HttpsUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpsUpdate")
            .field("certificate_len", &self.certificate_pem.len())
            .field("expires_at", &self.expires_at)
            .field("issuer", &self.issuer)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// CDN operations used by the certificate lifecycle
#[async_trait]
pub trait CdnControlPlane: Send + Sync {
    /// Current HTTPS configuration; `DomainNotFound` if the CDN does not serve `domain`
    async fn https_config(&self, domain: &str) -> Result<HttpsConfig, CdnError>;

    /// Switch HTTPS on with the given certificate
    async fn update_https(&self, domain: &str, update: &HttpsUpdate) -> Result<(), CdnError>;
}

#[async_trait]
impl<T: CdnControlPlane + ?Sized> CdnControlPlane for Arc<T> {
    async fn https_config(&self, domain: &str) -> Result<HttpsConfig, CdnError> {
        (**self).https_config(domain).await
    }

    async fn update_https(&self, domain: &str, update: &HttpsUpdate) -> Result<(), CdnError> {
        (**self).update_https(domain, update).await
    }
}
