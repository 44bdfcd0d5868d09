//! ACME certificate management
//!
//! Obtains and renews Let's Encrypt certificates through DNS-01 and keeps
//! the resulting state on disk, partitioned by CA endpoint.
//!
//! # Architecture
//!
//! - [`IdentityRepository`] - ACME account key and registration per email
//! - [`CertificateRepository`] - current certificate bundle per domain
//! - [`CertificateAuthority`] - the authority capability, implemented by
//!   [`AcmeAuthority`] on top of `instant-acme`
//! - [`CertificateAuthoritySession`] - a registered identity bound to the
//!   repositories; what the scheduler talks to
//! - [`dns`] - DNS-01 record publication and propagation checks
//!
//! # Persisted layout
//!
//! ```text
//! <root>/accounts/<ca-endpoint>/<email>/account.json
//! <root>/accounts/<ca-endpoint>/<email>/private.key
//! <root>/certificates/<ca-endpoint>/<domain>/cert.json
//! <root>/certificates/<ca-endpoint>/<domain>/private.key
//! <root>/certificates/<ca-endpoint>/<domain>/csr.pem
//! <root>/certificates/<ca-endpoint>/<domain>/cert.pem
//! <root>/certificates/<ca-endpoint>/<domain>/issuer-cert.pem
//! ```

mod account;
mod authority;
mod certificate;
mod client;
pub mod dns;
mod endpoint;
mod error;
mod fs;
mod identity;
mod session;
mod storage;

pub use account::{FilesystemIdentityRepository, IdentityRepository};
pub use authority::CertificateAuthority;
pub use certificate::{not_after, split_chain, CertificateBundle, CertificateMeta, CertificateParseError};
pub use client::AcmeAuthority;
pub use endpoint::CaEndpoint;
pub use error::{AuthorityError, RepositoryError, SessionError};
pub use identity::{AccountKey, Enrollment, Identity, Registration};
pub use session::CertificateAuthoritySession;
pub use storage::{CertificateRepository, FilesystemCertificateRepository};
