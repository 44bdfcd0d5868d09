//! Identity repository
//!
//! # Directory Structure
//!
//! ```text
//! <root>/accounts/<ca-endpoint>/
//! └── admin@example.com/
//!     ├── account.json      # email + registration record
//!     └── private.key       # PKCS#8 PEM account key
//! ```
//!
//! A missing or unreadable record is never an error: the repository hands
//! back a fresh unregistered identity and the session registers it again.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::endpoint::CaEndpoint;
use super::error::RepositoryError;
use super::fs::{ensure_private_dir, read_optional, write_private};
use super::identity::{AccountKey, Identity, Registration};

const ACCOUNT_FILE: &str = "account.json";
const KEY_FILE: &str = "private.key";

/// Persistent store of ACME identities, one per email for a CA endpoint
pub trait IdentityRepository: Send + Sync {
    /// Load the identity for `email`, creating a new one when none is usable
    ///
    /// Only [`RepositoryError::KeyGeneration`] can be returned.
    fn get(&self, email: &str) -> Result<Identity, RepositoryError>;

    /// Persist the identity's record and key
    fn save(&self, identity: &Identity) -> Result<(), RepositoryError>;
}

/// `account.json` contents
#[derive(Debug, Serialize, Deserialize)]
struct StoredAccount {
    email: String,
    #[serde(default)]
    registration: Option<Registration>,
}

/// An email that stays a single directory below the accounts root
fn is_plain_name(email: &str) -> bool {
    !email.is_empty() && !email.contains('/') && !email.contains('\\') && !email.starts_with('.')
}

/// Identity repository on the local filesystem
#[derive(Debug)]
pub struct FilesystemIdentityRepository {
    base_path: PathBuf,
}

impl FilesystemIdentityRepository {
    pub fn new(data_dir: &Path, endpoint: &CaEndpoint) -> Self {
        Self {
            base_path: endpoint.accounts_dir(data_dir),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn account_path(&self, email: &str) -> PathBuf {
        self.base_path.join(email)
    }

    /// Read a stored identity, describing why it is unusable on failure
    fn load(&self, email: &str) -> Result<Option<Identity>, String> {
        let dir = self.account_path(email);

        let account_json = match read_optional(&dir.join(ACCOUNT_FILE)).map_err(|e| e.to_string())? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let stored: StoredAccount = serde_json::from_slice(&account_json)
            .map_err(|e| format!("corrupt {}: {}", ACCOUNT_FILE, e))?;
        if stored.email != email {
            return Err(format!("{} belongs to '{}'", ACCOUNT_FILE, stored.email));
        }

        let key_pem = read_optional(&dir.join(KEY_FILE))
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("{} is missing", KEY_FILE))?;
        let key_pem = String::from_utf8(key_pem).map_err(|e| format!("{}: {}", KEY_FILE, e))?;
        let key = AccountKey::from_pem(&key_pem).map_err(|e| format!("{}: {}", KEY_FILE, e))?;

        Ok(Some(Identity::restore(email, key, stored.registration)))
    }
}

impl IdentityRepository for FilesystemIdentityRepository {
    fn get(&self, email: &str) -> Result<Identity, RepositoryError> {
        match self.load(email) {
            Ok(Some(identity)) => {
                debug!(
                    email = %email,
                    registered = identity.is_registered(),
                    "Loaded ACME identity"
                );
                return Ok(identity);
            }
            Ok(None) => {
                info!(email = %email, "No stored ACME identity, creating a new one");
            }
            Err(reason) => {
                warn!(
                    email = %email,
                    path = %self.account_path(email).display(),
                    reason = %reason,
                    "Stored ACME identity is unusable, creating a new one"
                );
            }
        }

        Identity::new(email)
    }

    fn save(&self, identity: &Identity) -> Result<(), RepositoryError> {
        let dir = self.account_path(identity.email());
        if !is_plain_name(identity.email()) {
            return Err(RepositoryError::persistence(
                &dir,
                "account email cannot be used as a directory name",
            ));
        }
        ensure_private_dir(&dir)?;

        let stored = StoredAccount {
            email: identity.email().to_string(),
            registration: identity.registration().cloned(),
        };
        let account_json = serde_json::to_vec_pretty(&stored)
            .map_err(|e| RepositoryError::persistence(&dir.join(ACCOUNT_FILE), e))?;

        write_private(&dir.join(ACCOUNT_FILE), &account_json)?;
        write_private(&dir.join(KEY_FILE), identity.key().to_pem().as_bytes())?;

        info!(
            email = %identity.email(),
            registered = identity.is_registered(),
            "Saved ACME identity"
        );
        Ok(())
    }
}
