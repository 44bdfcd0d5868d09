//! DNS-01 challenge management
//!
//! Orchestrates the DNS-01 challenge flow:
//! 1. Create TXT records via the DNS provider
//! 2. Wait for propagation
//! 3. Cleanup records after validation

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::propagation::{PropagationChecker, PropagationConfig};
use super::provider::{challenge_record_fqdn, normalize_domain, DnsProvider, DnsResult, ACME_CHALLENGE_RECORD};

/// A pending DNS-01 challenge
#[derive(Debug, Clone)]
pub struct Dns01ChallengeInfo {
    /// Domain this challenge is for
    pub domain: String,
    /// e.g. `_acme-challenge.example.com`
    pub record_name: String,
    /// TXT value to publish
    pub record_value: String,
    /// Challenge URL for validation notification
    pub url: String,
    /// Record ID after creation
    pub record_id: Option<String>,
}

impl Dns01ChallengeInfo {
    pub fn new(domain: &str, key_authorization: &str, challenge_url: &str) -> Self {
        Self {
            domain: domain.to_string(),
            record_name: challenge_record_fqdn(domain),
            record_value: compute_challenge_value(key_authorization),
            url: challenge_url.to_string(),
            record_id: None,
        }
    }
}

/// The DNS-01 TXT value: base64url(SHA-256(key authorization))
pub fn compute_challenge_value(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
}

/// Challenge records published for one order
///
/// Records are removed by [`Self::cleanup`]. If the owner is dropped first,
/// e.g. when an issuance times out or its cycle is cancelled, the removal is
/// spawned onto the current runtime instead.
pub struct PublishedChallenges {
    provider: Arc<DnsProvider>,
    challenges: Vec<Dns01ChallengeInfo>,
}

impl PublishedChallenges {
    pub fn new(provider: Arc<DnsProvider>) -> Self {
        Self {
            provider,
            challenges: Vec::new(),
        }
    }

    /// Create the TXT record and track it for removal
    pub async fn publish(&mut self, mut challenge: Dns01ChallengeInfo) -> DnsResult<()> {
        info!(
            domain = %challenge.domain,
            record = %challenge.record_name,
            provider = %self.provider.name(),
            "Creating DNS-01 challenge record"
        );

        let record_id = self
            .provider
            .create_txt_record(
                normalize_domain(&challenge.domain),
                ACME_CHALLENGE_RECORD,
                &challenge.record_value,
            )
            .await?;

        debug!(domain = %challenge.domain, record_id = %record_id, "DNS record created");
        challenge.record_id = Some(record_id);
        self.challenges.push(challenge);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dns01ChallengeInfo> {
        self.challenges.iter()
    }

    /// Remove every published record, logging failures
    pub async fn cleanup(mut self) {
        let challenges = std::mem::take(&mut self.challenges);
        remove_records(&self.provider, &challenges).await;
    }
}

impl Drop for PublishedChallenges {
    fn drop(&mut self) {
        if self.challenges.is_empty() {
            return;
        }

        let challenges = std::mem::take(&mut self.challenges);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    records = challenges.len(),
                    "DNS-01 validation abandoned, removing challenge records in the background"
                );
                let provider = Arc::clone(&self.provider);
                handle.spawn(async move {
                    remove_records(&provider, &challenges).await;
                });
            }
            Err(_) => {
                for challenge in &challenges {
                    warn!(
                        domain = %challenge.domain,
                        record = %challenge.record_name,
                        "No runtime left to remove DNS-01 challenge record"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for PublishedChallenges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedChallenges")
            .field("provider", &self.provider.name())
            .field("challenges", &self.challenges)
            .finish()
    }
}

async fn remove_records(provider: &DnsProvider, challenges: &[Dns01ChallengeInfo]) {
    for challenge in challenges {
        let Some(record_id) = &challenge.record_id else {
            continue;
        };

        match provider
            .delete_txt_record(normalize_domain(&challenge.domain), record_id)
            .await
        {
            Ok(()) => {
                debug!(domain = %challenge.domain, "DNS-01 challenge record cleaned up");
            }
            Err(e) => {
                warn!(
                    domain = %challenge.domain,
                    record_id = %record_id,
                    error = %e,
                    "Failed to cleanup DNS-01 challenge record"
                );
            }
        }
    }
}

/// DNS-01 challenge manager
#[derive(Debug)]
pub struct Dns01ChallengeManager {
    provider: Arc<DnsProvider>,
    propagation_checker: PropagationChecker,
}

impl Dns01ChallengeManager {
    pub fn new(provider: DnsProvider, propagation: PropagationConfig) -> Self {
        Self {
            provider: Arc::new(provider),
            propagation_checker: PropagationChecker::new(propagation),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Start tracking the records of one order
    pub fn begin(&self) -> PublishedChallenges {
        PublishedChallenges::new(Arc::clone(&self.provider))
    }

    /// Publish the challenge record and wait until resolvers serve it
    ///
    /// The record is tracked as soon as it exists so a failed propagation
    /// wait still gets cleaned up.
    pub async fn create_and_wait(
        &self,
        published: &mut PublishedChallenges,
        challenge: Dns01ChallengeInfo,
    ) -> DnsResult<()> {
        let domain = challenge.domain.clone();
        let value = challenge.record_value.clone();
        published.publish(challenge).await?;

        self.propagation_checker
            .wait_for_propagation(&domain, &value)
            .await?;

        info!(domain = %domain, "DNS-01 challenge record propagated");
        Ok(())
    }
}
