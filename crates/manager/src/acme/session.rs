//! Certificate authority session
//!
//! Binds one registered identity to the repositories so callers only deal
//! with domains. Registration happens at most once per identity and the
//! registered identity is persisted before the session is handed out.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::account::IdentityRepository;
use super::authority::CertificateAuthority;
use super::certificate::CertificateBundle;
use super::error::SessionError;
use super::identity::Identity;
use super::storage::CertificateRepository;

pub struct CertificateAuthoritySession<A> {
    authority: A,
    identities: Arc<dyn IdentityRepository>,
    certificates: Arc<dyn CertificateRepository>,
    identity: Identity,
}

impl<A: CertificateAuthority> CertificateAuthoritySession<A> {
    /// Resolve the identity for `email`, registering it if needed
    pub async fn connect(
        authority: A,
        identities: Arc<dyn IdentityRepository>,
        certificates: Arc<dyn CertificateRepository>,
        email: &str,
    ) -> Result<Self, SessionError> {
        let mut identity = identities.get(email)?;

        if identity.is_registered() {
            debug!(email = %email, "Using existing ACME registration");
        } else {
            let enrollment = authority.register(&identity).await?;
            identity.enroll(enrollment);
            identities.save(&identity)?;

            info!(
                email = %email,
                account_url = identity.registration().map(|r| r.uri.as_str()).unwrap_or_default(),
                "ACME identity registered and saved"
            );
        }

        Ok(Self {
            authority,
            identities,
            certificates,
            identity,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    pub fn identities(&self) -> &Arc<dyn IdentityRepository> {
        &self.identities
    }

    pub fn certificates(&self) -> &Arc<dyn CertificateRepository> {
        &self.certificates
    }

    /// Issue a fresh certificate for one domain and persist it
    pub async fn obtain(&self, domain: &str) -> Result<CertificateBundle, SessionError> {
        let bundle = self.authority.obtain(&self.identity, domain).await?;
        self.certificates.save(&bundle)?;

        info!(domain = %domain, "Certificate obtained and stored");
        Ok(bundle)
    }

    /// Renew the stored certificate for one domain
    ///
    /// Fails with `NotFound` before contacting the authority when no
    /// complete bundle is stored.
    pub async fn renew(&self, domain: &str) -> Result<CertificateBundle, SessionError> {
        let previous = self.certificates.get(domain)?;
        let bundle = self.authority.renew(&self.identity, &previous).await?;
        self.certificates.save(&bundle)?;

        info!(domain = %domain, "Certificate renewed and stored");
        Ok(bundle)
    }
}

impl<A> fmt::Debug for CertificateAuthoritySession<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthoritySession")
            .field("email", &self.identity.email())
            .field("registered", &self.identity.is_registered())
            .finish_non_exhaustive()
    }
}
