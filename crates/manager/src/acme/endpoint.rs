//! Storage namespace derived from the CA directory URL
//!
//! Identities and certificates are partitioned by the authority's network
//! location so that staging and production never share state.

use std::fmt;
use std::path::{Path, PathBuf};

use url::Url;

use super::error::RepositoryError;

/// A certificate authority endpoint and its filesystem-safe namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaEndpoint {
    directory_url: String,
    namespace: String,
}

impl CaEndpoint {
    /// Derive the endpoint from an ACME directory URL
    ///
    /// The namespace is `host[:port]` with colons and path separators
    /// replaced by underscores.
    pub fn from_directory_url(directory_url: &str) -> Result<Self, RepositoryError> {
        let invalid = |message: &str| RepositoryError::InvalidEndpoint {
            url: directory_url.to_string(),
            message: message.to_string(),
        };

        let url = Url::parse(directory_url).map_err(|e| invalid(&e.to_string()))?;
        let host = url.host_str().ok_or_else(|| invalid("URL has no host"))?;

        let location = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let namespace: String = location
            .chars()
            .map(|c| match c {
                ':' | '/' | '\\' => '_',
                other => other,
            })
            .collect();

        Ok(Self {
            directory_url: directory_url.to_string(),
            namespace,
        })
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `<root>/accounts/<ca-endpoint>`
    pub fn accounts_dir(&self, root: &Path) -> PathBuf {
        root.join("accounts").join(&self.namespace)
    }

    /// `<root>/certificates/<ca-endpoint>`
    pub fn certificates_dir(&self, root: &Path) -> PathBuf {
        root.join("certificates").join(&self.namespace)
    }
}

impl fmt::Display for CaEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_from_host() {
        let endpoint = CaEndpoint::from_directory_url(
            "https://acme-staging-v02.api.letsencrypt.org/directory",
        )
        .unwrap();
        assert_eq!(endpoint.namespace(), "acme-staging-v02.api.letsencrypt.org");
    }

    #[test]
    fn test_namespace_keeps_port() {
        let endpoint = CaEndpoint::from_directory_url("https://localhost:14000/dir").unwrap();
        assert_eq!(endpoint.namespace(), "localhost_14000");
        assert_eq!(
            endpoint.accounts_dir(Path::new("/data")),
            PathBuf::from("/data/accounts/localhost_14000")
        );
        assert_eq!(
            endpoint.certificates_dir(Path::new("/data")),
            PathBuf::from("/data/certificates/localhost_14000")
        );
    }

    #[test]
    fn test_staging_and_production_differ() {
        let staging = CaEndpoint::from_directory_url(cdn_cert_manager_config::LETSENCRYPT_STAGING)
            .unwrap();
        let production =
            CaEndpoint::from_directory_url(cdn_cert_manager_config::LETSENCRYPT_PRODUCTION)
                .unwrap();
        assert_ne!(staging.namespace(), production.namespace());
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            CaEndpoint::from_directory_url("not a url"),
            Err(RepositoryError::InvalidEndpoint { .. })
        ));
    }
}
