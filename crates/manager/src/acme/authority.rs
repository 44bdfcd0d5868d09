//! Certificate authority capability

use std::sync::Arc;

use async_trait::async_trait;

use super::certificate::CertificateBundle;
use super::error::AuthorityError;
use super::identity::{Enrollment, Identity};

/// What the lifecycle core needs from a certificate authority
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Register a new account for the identity
    async fn register(&self, identity: &Identity) -> Result<Enrollment, AuthorityError>;

    /// Issue a certificate for a single domain with a bundled chain
    async fn obtain(
        &self,
        identity: &Identity,
        domain: &str,
    ) -> Result<CertificateBundle, AuthorityError>;

    /// Replace an existing certificate
    async fn renew(
        &self,
        identity: &Identity,
        previous: &CertificateBundle,
    ) -> Result<CertificateBundle, AuthorityError>;
}

#[async_trait]
impl<T: CertificateAuthority + ?Sized> CertificateAuthority for Arc<T> {
    async fn register(&self, identity: &Identity) -> Result<Enrollment, AuthorityError> {
        (**self).register(identity).await
    }

    async fn obtain(
        &self,
        identity: &Identity,
        domain: &str,
    ) -> Result<CertificateBundle, AuthorityError> {
        (**self).obtain(identity, domain).await
    }

    async fn renew(
        &self,
        identity: &Identity,
        previous: &CertificateBundle,
    ) -> Result<CertificateBundle, AuthorityError> {
        (**self).renew(identity, previous).await
    }
}
