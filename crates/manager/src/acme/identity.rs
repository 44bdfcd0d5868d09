//! ACME account identities

use std::fmt;

use rcgen::{KeyPair, PKCS_ECDSA_P256_SHA256};
use serde::{Deserialize, Serialize};

use super::error::RepositoryError;

/// ECDSA P-256 account key, held as PKCS#8 PEM
#[derive(Clone, PartialEq, Eq)]
pub struct AccountKey {
    pem: String,
}

impl AccountKey {
    /// Generate a fresh P-256 key
    pub fn generate() -> Result<Self, RepositoryError> {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| RepositoryError::KeyGeneration(e.to_string()))?;
        Ok(Self {
            pem: key.serialize_pem(),
        })
    }

    /// Load a PKCS#8 PEM key, rejecting anything rcgen cannot parse
    pub fn from_pem(pem: &str) -> Result<Self, rcgen::Error> {
        let key = KeyPair::from_pem(pem)?;
        Ok(Self {
            pem: key.serialize_pem(),
        })
    }

    /// Load a PKCS#8 DER key
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, rcgen::Error> {
        let key = KeyPair::try_from(der)?;
        Ok(Self {
            pem: key.serialize_pem(),
        })
    }

    pub fn to_pem(&self) -> &str {
        &self.pem
    }

    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>, rcgen::Error> {
        Ok(KeyPair::from_pem(&self.pem)?.serialize_der())
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountKey(***)")
    }
}

/// Registration record issued by the authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Account URL
    pub uri: String,
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(default)]
    pub terms_of_service_agreed: bool,
    /// Directory the account was created against
    #[serde(default)]
    pub directory: Option<String>,
}

/// Result of a successful registration: the record plus the key it was made with
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub registration: Registration,
    pub key: AccountKey,
}

/// An account with one certificate authority
#[derive(Debug, Clone)]
pub struct Identity {
    email: String,
    key: AccountKey,
    registration: Option<Registration>,
}

impl Identity {
    /// Create an unregistered identity with a fresh key
    ///
    /// The fresh key is a placeholder. `instant-acme` generates its own
    /// account key during registration and [`Self::enroll`] swaps it in, so
    /// the key that gets persisted is always the one the CA knows. An
    /// identity that is never registered keeps its placeholder.
    pub fn new(email: &str) -> Result<Self, RepositoryError> {
        Ok(Self {
            email: email.to_string(),
            key: AccountKey::generate()?,
            registration: None,
        })
    }

    /// Rebuild a persisted identity
    pub fn restore(email: &str, key: AccountKey, registration: Option<Registration>) -> Self {
        Self {
            email: email.to_string(),
            key,
            registration,
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    pub fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Attach the authority's registration record
    ///
    /// Only an unregistered identity takes the enrollment key; once a
    /// registration exists both the record and the key are kept.
    pub fn enroll(&mut self, enrollment: Enrollment) {
        if self.registration.is_some() {
            return;
        }
        self.key = enrollment.key;
        self.registration = Some(enrollment.registration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(uri: &str) -> Registration {
        Registration {
            uri: uri.to_string(),
            contact: vec!["mailto:admin@example.com".to_string()],
            terms_of_service_agreed: true,
            directory: None,
        }
    }

    #[test]
    fn test_new_identity_is_unregistered() {
        let identity = Identity::new("admin@example.com").unwrap();
        assert_eq!(identity.email(), "admin@example.com");
        assert!(!identity.is_registered());
        assert!(identity.key().to_pem().contains("PRIVATE KEY"));
    }

    #[test]
    fn test_key_pem_and_der_agree() {
        let key = AccountKey::generate().unwrap();
        let der = key.to_pkcs8_der().unwrap();
        let from_der = AccountKey::from_pkcs8_der(&der).unwrap();
        assert_eq!(from_der, key);
        assert_eq!(AccountKey::from_pem(key.to_pem()).unwrap(), key);
    }

    #[test]
    fn test_garbage_key_rejected() {
        assert!(AccountKey::from_pem("not a key").is_err());
    }

    #[test]
    fn test_enroll_binds_registration_once() {
        let mut identity = Identity::new("admin@example.com").unwrap();
        let enrolled_key = AccountKey::generate().unwrap();

        identity.enroll(Enrollment {
            registration: registration("https://ca.example/acct/1"),
            key: enrolled_key.clone(),
        });
        assert!(identity.is_registered());
        assert_eq!(identity.key(), &enrolled_key);

        identity.enroll(Enrollment {
            registration: registration("https://ca.example/acct/2"),
            key: AccountKey::generate().unwrap(),
        });
        assert_eq!(identity.registration().unwrap().uri, "https://ca.example/acct/1");
        assert_eq!(identity.key(), &enrolled_key);
    }

    #[test]
    fn test_debug_redacts_key() {
        let identity = Identity::new("admin@example.com").unwrap();
        assert!(!format!("{:?}", identity).contains("BEGIN"));
    }
}
