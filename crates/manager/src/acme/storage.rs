//! Certificate repository
//!
//! Provides persistent storage for issued certificate bundles.
//!
//! # Directory Structure
//!
//! ```text
//! <root>/certificates/<ca-endpoint>/
//! └── example.com/
//!     ├── cert.json         # domain, certificate URLs
//!     ├── private.key       # certificate private key
//!     ├── csr.pem           # certificate signing request
//!     ├── cert.pem          # full chain, leaf first
//!     └── issuer-cert.pem   # issuer chain
//! ```
//!
//! A bundle is written into a staging directory and swapped in with renames,
//! so a reader finds either the previous complete bundle or the new one.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use super::certificate::{CertificateBundle, CertificateMeta};
use super::endpoint::CaEndpoint;
use super::error::RepositoryError;
use super::fs::{ensure_private_dir, read_optional, write_private};

const META_FILE: &str = "cert.json";
const KEY_FILE: &str = "private.key";
const CSR_FILE: &str = "csr.pem";
const CERT_FILE: &str = "cert.pem";
const ISSUER_FILE: &str = "issuer-cert.pem";

const STAGING_PREFIX: &str = ".staging-";
const PREVIOUS_PREFIX: &str = ".previous-";

/// Persistent store of the current certificate bundle per domain
pub trait CertificateRepository: Send + Sync {
    /// Load the current bundle; [`RepositoryError::NotFound`] when any artifact is missing
    fn get(&self, domain: &str) -> Result<CertificateBundle, RepositoryError>;

    /// Replace the domain's bundle
    fn save(&self, bundle: &CertificateBundle) -> Result<(), RepositoryError>;

    /// Domains that have a stored bundle
    fn list_domains(&self) -> Result<Vec<String>, RepositoryError>;

    /// Paths of the stored certificate chain and private key
    fn certificate_paths(&self, domain: &str) -> Option<(PathBuf, PathBuf)>;
}

/// Certificate repository on the local filesystem
#[derive(Debug)]
pub struct FilesystemCertificateRepository {
    base_path: PathBuf,
}

impl FilesystemCertificateRepository {
    pub fn new(data_dir: &Path, endpoint: &CaEndpoint) -> Self {
        Self {
            base_path: endpoint.certificates_dir(data_dir),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn domain_path(&self, domain: &str) -> PathBuf {
        self.base_path.join(domain)
    }

    fn staging_path(&self, domain: &str) -> PathBuf {
        self.base_path.join(format!("{}{}", STAGING_PREFIX, domain))
    }

    fn previous_path(&self, domain: &str) -> PathBuf {
        self.base_path.join(format!("{}{}", PREVIOUS_PREFIX, domain))
    }

    fn read_bundle(&self, domain: &str, dir: &Path) -> Result<CertificateBundle, RepositoryError> {
        let read = |name: &str| -> Result<Vec<u8>, RepositoryError> {
            let path = dir.join(name);
            read_optional(&path)
                .map_err(|e| RepositoryError::persistence(&path, e))?
                .ok_or_else(|| RepositoryError::NotFound {
                    domain: domain.to_string(),
                    missing: name.to_string(),
                })
        };

        let meta_bytes = read(META_FILE)?;
        let meta: CertificateMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| RepositoryError::persistence(&dir.join(META_FILE), e))?;

        Ok(CertificateBundle {
            domain: domain.to_string(),
            cert_url: meta.cert_url,
            cert_stable_url: meta.cert_stable_url,
            private_key: read(KEY_FILE)?,
            csr: read(CSR_FILE)?,
            certificate: read(CERT_FILE)?,
            issuer_certificate: read(ISSUER_FILE)?,
        })
    }

    fn write_bundle(&self, dir: &Path, bundle: &CertificateBundle) -> Result<(), RepositoryError> {
        ensure_private_dir(dir)?;

        let meta = serde_json::to_vec_pretty(&bundle.meta())
            .map_err(|e| RepositoryError::persistence(&dir.join(META_FILE), e))?;

        write_private(&dir.join(META_FILE), &meta)?;
        write_private(&dir.join(KEY_FILE), &bundle.private_key)?;
        write_private(&dir.join(CSR_FILE), &bundle.csr)?;
        write_private(&dir.join(CERT_FILE), &bundle.certificate)?;
        write_private(&dir.join(ISSUER_FILE), &bundle.issuer_certificate)?;
        Ok(())
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<(), RepositoryError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RepositoryError::persistence(path, e)),
    }
}

impl CertificateRepository for FilesystemCertificateRepository {
    fn get(&self, domain: &str) -> Result<CertificateBundle, RepositoryError> {
        let domain_path = self.domain_path(domain);

        // A save interrupted between its two renames leaves only the previous bundle
        let dir = if !domain_path.exists() && self.previous_path(domain).exists() {
            warn!(domain = %domain, "Recovering certificate from interrupted save");
            self.previous_path(domain)
        } else {
            domain_path
        };

        match self.read_bundle(domain, &dir) {
            Ok(bundle) => {
                debug!(domain = %domain, "Loaded stored certificate");
                Ok(bundle)
            }
            Err(e) => {
                trace!(domain = %domain, error = %e, "No usable stored certificate");
                Err(e)
            }
        }
    }

    fn save(&self, bundle: &CertificateBundle) -> Result<(), RepositoryError> {
        let domain = bundle.domain.as_str();
        ensure_private_dir(&self.base_path)?;

        let staging = self.staging_path(domain);
        let previous = self.previous_path(domain);
        let target = self.domain_path(domain);

        remove_dir_if_exists(&staging)?;
        self.write_bundle(&staging, bundle)?;

        if target.exists() {
            remove_dir_if_exists(&previous)?;
            fs::rename(&target, &previous)
                .map_err(|e| RepositoryError::persistence(&target, e))?;
        }
        fs::rename(&staging, &target).map_err(|e| RepositoryError::persistence(&target, e))?;

        if let Err(e) = remove_dir_if_exists(&previous) {
            warn!(domain = %domain, error = %e, "Failed to remove previous certificate");
        }

        info!(domain = %domain, "Saved certificate to storage");
        Ok(())
    }

    fn list_domains(&self) -> Result<Vec<String>, RepositoryError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.base_path)
            .map_err(|e| RepositoryError::persistence(&self.base_path, e))?;

        let mut domains = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RepositoryError::persistence(&self.base_path, e))?;
            let is_dir = entry
                .file_type()
                .map_err(|e| RepositoryError::persistence(&entry.path(), e))?
                .is_dir();
            if !is_dir {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    domains.push(name.to_string());
                }
            }
        }

        domains.sort();
        Ok(domains)
    }

    fn certificate_paths(&self, domain: &str) -> Option<(PathBuf, PathBuf)> {
        let domain_path = self.domain_path(domain);
        let cert_path = domain_path.join(CERT_FILE);
        let key_path = domain_path.join(KEY_FILE);

        if cert_path.exists() && key_path.exists() {
            Some((cert_path, key_path))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_repository() -> (TempDir, FilesystemCertificateRepository) {
        let temp_dir = TempDir::new().unwrap();
        let endpoint = CaEndpoint::from_directory_url("https://ca.example.com/directory").unwrap();
        let repo = FilesystemCertificateRepository::new(temp_dir.path(), &endpoint);
        (temp_dir, repo)
    }

    fn bundle(domain: &str, tag: &str) -> CertificateBundle {
        CertificateBundle {
            domain: domain.to_string(),
            cert_url: format!("https://ca.example.com/cert/{}", tag),
            cert_stable_url: format!("https://ca.example.com/cert/{}", tag),
            private_key: format!("key-{}", tag).into_bytes(),
            csr: format!("csr-{}", tag).into_bytes(),
            certificate: format!("cert-{}\r\n\0binary", tag).into_bytes(),
            issuer_certificate: format!("issuer-{}", tag).into_bytes(),
        }
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let (_temp_dir, repo) = setup_repository();
        let original = bundle("example.com", "1");

        repo.save(&original).unwrap();
        let loaded = repo.get("example.com").unwrap();

        assert_eq!(loaded, original);
    }

    #[test]
    fn test_layout() {
        let (temp_dir, repo) = setup_repository();
        repo.save(&bundle("example.com", "1")).unwrap();

        let dir = temp_dir.path().join("certificates/ca.example.com/example.com");
        for name in ["cert.json", "private.key", "csr.pem", "cert.pem", "issuer-cert.pem"] {
            assert!(dir.join(name).exists(), "{} missing", name);
        }
    }

    #[test]
    fn test_save_overwrites_previous_bundle() {
        let (_temp_dir, repo) = setup_repository();
        repo.save(&bundle("example.com", "old")).unwrap();
        repo.save(&bundle("example.com", "new")).unwrap();

        assert_eq!(repo.get("example.com").unwrap(), bundle("example.com", "new"));
        assert!(!repo.previous_path("example.com").exists());
        assert!(!repo.staging_path("example.com").exists());
    }

    #[test]
    fn test_missing_bundle_is_not_found() {
        let (_temp_dir, repo) = setup_repository();
        let err = repo.get("nonexistent.com").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_missing_artifact_is_not_found() {
        let (_temp_dir, repo) = setup_repository();
        repo.save(&bundle("example.com", "1")).unwrap();
        fs::remove_file(repo.base_path().join("example.com/issuer-cert.pem")).unwrap();

        match repo.get("example.com").unwrap_err() {
            RepositoryError::NotFound { missing, .. } => assert_eq!(missing, "issuer-cert.pem"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_corrupt_metadata_is_persistence_error() {
        let (_temp_dir, repo) = setup_repository();
        repo.save(&bundle("example.com", "1")).unwrap();
        fs::write(repo.base_path().join("example.com/cert.json"), "[").unwrap();

        assert!(matches!(
            repo.get("example.com").unwrap_err(),
            RepositoryError::Persistence { .. }
        ));
    }

    #[test]
    fn test_interrupted_swap_recovers_previous() {
        let (_temp_dir, repo) = setup_repository();
        repo.save(&bundle("example.com", "old")).unwrap();
        fs::rename(repo.domain_path("example.com"), repo.previous_path("example.com")).unwrap();

        assert_eq!(repo.get("example.com").unwrap(), bundle("example.com", "old"));
    }

    #[test]
    fn test_list_domains_skips_staging() {
        let (_temp_dir, repo) = setup_repository();
        assert!(repo.list_domains().unwrap().is_empty());

        repo.save(&bundle("b.com", "1")).unwrap();
        repo.save(&bundle("a.com", "1")).unwrap();
        fs::create_dir_all(repo.staging_path("c.com")).unwrap();

        assert_eq!(repo.list_domains().unwrap(), vec!["a.com", "b.com"]);
    }

    #[test]
    fn test_certificate_paths() {
        let (_temp_dir, repo) = setup_repository();
        assert!(repo.certificate_paths("a.com").is_none());

        repo.save(&bundle("a.com", "1")).unwrap();
        let (cert, key) = repo.certificate_paths("a.com").unwrap();
        assert!(cert.ends_with("a.com/cert.pem"));
        assert!(key.ends_with("a.com/private.key"));
    }
}
