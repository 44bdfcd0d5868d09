//! Startup wiring
//!
//! Builds every component from [`Settings`] once. Nothing is reconfigured
//! after startup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cdn_cert_manager_config::Settings;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::acme::dns::{Dns01ChallengeManager, DnsProvider, DnsProviderError, PropagationConfig};
use crate::acme::{
    AcmeAuthority, CaEndpoint, CertificateRepository, FilesystemCertificateRepository,
    FilesystemIdentityRepository, IdentityRepository, RepositoryError,
};
use crate::cdn::{CdnError, CdnState, TencentCdnClient};
use crate::scheduler::{Orchestrator, OrchestratorConfig};

/// Per-request timeout for CDN API calls
pub const CDN_TIMEOUT: Duration = Duration::from_secs(30);

/// The production orchestrator
pub type Manager = Orchestrator<AcmeAuthority, TencentCdnClient>;

/// Fatal errors raised before the scheduler starts
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid CA directory: {0}")]
    Endpoint(#[source] RepositoryError),

    #[error("Failed to set up DNS provider: {0}")]
    Dns(#[from] DnsProviderError),

    #[error("Failed to set up CDN client: {0}")]
    Cdn(#[from] CdnError),
}

/// A certificate bundle found on disk
#[derive(Debug, Clone)]
pub struct StoredCertificate {
    pub domain: String,
    /// `None` when the stored leaf cannot be parsed
    pub expires_at: Option<DateTime<Utc>>,
    /// Leaf chain path, for operators copying the certificate by hand
    pub certificate_path: Option<PathBuf>,
}

/// Fully wired application
pub struct App {
    settings: Settings,
    endpoint: CaEndpoint,
    certificates: Arc<dyn CertificateRepository>,
    manager: Manager,
}

impl App {
    pub fn new(settings: Settings) -> Result<Self, StartupError> {
        let endpoint =
            CaEndpoint::from_directory_url(&settings.ca_directory_url).map_err(StartupError::Endpoint)?;

        let identities: Arc<dyn IdentityRepository> =
            Arc::new(FilesystemIdentityRepository::new(&settings.data_dir, &endpoint));
        let certificates: Arc<dyn CertificateRepository> =
            Arc::new(FilesystemCertificateRepository::new(&settings.data_dir, &endpoint));

        let provider = DnsProvider::from_settings(&settings.dns.provider)?;
        let challenges = Dns01ChallengeManager::new(
            provider,
            PropagationConfig::with_timeout(Duration::from_secs(settings.dns.propagation_timeout_secs)),
        );
        let authority = AcmeAuthority::new(
            endpoint.clone(),
            challenges,
            Duration::from_secs(settings.authority_timeout_secs),
        );

        let cdn = TencentCdnClient::new(
            &settings.cdn.region,
            &settings.cdn.secret_id,
            settings.cdn.secret_key.expose(),
            CDN_TIMEOUT,
        )?;

        let manager = Orchestrator::new(
            OrchestratorConfig::from_settings(&settings),
            authority,
            CdnState::new(cdn),
            identities,
            certificates.clone(),
        );

        if settings.is_staging() {
            warn!(directory = %settings.ca_directory_url, "Using a staging CA; issued certificates are not publicly trusted");
        }
        info!(
            ca_endpoint = %endpoint,
            dns_provider = settings.dns.provider.name(),
            region = %settings.cdn.region,
            "Certificate manager configured"
        );

        Ok(Self {
            settings,
            endpoint,
            certificates,
            manager,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn endpoint(&self) -> &CaEndpoint {
        &self.endpoint
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    /// Fail fast if the CDN rejects the configured credentials
    pub async fn verify_cdn_credentials(&self) -> Result<(), StartupError> {
        if let Some(domain) = self.settings.domains.first() {
            self.manager.cdn().verify_credentials(domain).await?;
        }
        Ok(())
    }

    /// Bundles stored for the configured CA, sorted by domain
    pub fn stored_certificates(&self) -> Result<Vec<StoredCertificate>, RepositoryError> {
        let mut stored = Vec::new();
        for domain in self.certificates.list_domains()? {
            let expires_at = match self.certificates.get(&domain) {
                Ok(bundle) => bundle.not_after().ok(),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let certificate_path = self
                .certificates
                .certificate_paths(&domain)
                .map(|(cert, _)| cert);
            stored.push(StoredCertificate {
                domain,
                expires_at,
                certificate_path,
            });
        }
        stored.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(stored)
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("endpoint", &self.endpoint)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}
