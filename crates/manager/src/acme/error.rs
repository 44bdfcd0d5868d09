//! ACME error types

use std::time::Duration;

use thiserror::Error;

use super::dns::DnsProviderError;

/// Errors raised by the identity and certificate repositories
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Secure key generation failed
    #[error("Failed to generate private key: {0}")]
    KeyGeneration(String),

    /// I/O or encoding failure while reading or writing local state
    #[error("Persistence error at {path}: {message}")]
    Persistence { path: String, message: String },

    /// No complete certificate bundle is stored for the domain
    #[error("No stored certificate for domain '{domain}' ({missing} is missing)")]
    NotFound { domain: String, missing: String },

    /// The CA directory URL cannot be turned into a storage namespace
    #[error("Invalid CA directory URL '{url}': {message}")]
    InvalidEndpoint { url: String, message: String },
}

impl RepositoryError {
    pub(crate) fn persistence(path: &std::path::Path, message: impl ToString) -> Self {
        RepositoryError::Persistence {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this is the "no prior bundle" signal that sends renewals to issuance
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }
}

/// Errors raised by the certificate authority
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// Account registration was rejected
    #[error("Failed to register ACME account: {0}")]
    Registration(String),

    /// Order creation or polling failed
    #[error("Failed to create certificate order: {0}")]
    Order(String),

    /// Challenge validation failed
    #[error("Challenge validation failed for domain '{domain}': {message}")]
    Challenge { domain: String, message: String },

    /// Order finalization or certificate download failed
    #[error("Failed to finalize certificate: {0}")]
    Finalization(String),

    /// Operation exceeded the configured authority timeout
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// DNS provider operation failed while solving DNS-01
    #[error("DNS provider error: {0}")]
    Dns(#[from] DnsProviderError),

    /// A certificate returned by or handed to the authority is unreadable
    #[error("Failed to parse certificate: {0}")]
    CertificateParse(String),

    /// ACME protocol error from instant-acme
    #[error("ACME protocol error: {0}")]
    Protocol(String),
}

impl From<instant_acme::Error> for AuthorityError {
    fn from(e: instant_acme::Error) -> Self {
        AuthorityError::Protocol(e.to_string())
    }
}

/// Errors surfaced by [`super::CertificateAuthoritySession`]
///
/// Repository and authority failures pass through unchanged so the
/// orchestrator can decide containment in one place.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),
}
