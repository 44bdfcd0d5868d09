//! ACME client backed by `instant-acme`
//!
//! Implements [`CertificateAuthority`] with RFC 8555 orders solved through
//! DNS-01. Every call is bounded by the configured authority timeout, which
//! must leave room for DNS propagation.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use rcgen::{CertificateParams, KeyPair, PKCS_ECDSA_P256_SHA256};
use tokio::time::sleep;
use tracing::{debug, info};

use super::authority::CertificateAuthority;
use super::certificate::CertificateBundle;
use super::dns::{Dns01ChallengeInfo, Dns01ChallengeManager, PublishedChallenges};
use super::endpoint::CaEndpoint;
use super::error::AuthorityError;
use super::identity::{AccountKey, Enrollment, Identity, Registration};

/// Initial delay between order and certificate polls
const POLL_INITIAL_DELAY: Duration = Duration::from_secs(2);

/// Longest delay between polls
const POLL_MAX_DELAY: Duration = Duration::from_secs(10);

/// Certificate authority speaking ACME
#[derive(Debug)]
pub struct AcmeAuthority {
    endpoint: CaEndpoint,
    challenges: Dns01ChallengeManager,
    timeout: Duration,
}

/// Key material generated for one order
struct CertificateRequest {
    key_pem: String,
    csr_pem: String,
    csr_der: Vec<u8>,
}

impl AcmeAuthority {
    pub fn new(endpoint: CaEndpoint, challenges: Dns01ChallengeManager, timeout: Duration) -> Self {
        Self {
            endpoint,
            challenges,
            timeout,
        }
    }

    pub fn endpoint(&self) -> &CaEndpoint {
        &self.endpoint
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, AuthorityError>
    where
        F: Future<Output = Result<T, AuthorityError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| AuthorityError::Timeout {
                operation,
                elapsed: self.timeout,
            })?
    }

    /// Validation gets three quarters of the authority timeout, leaving the
    /// rest for finalization and record cleanup
    fn validation_deadline(&self) -> Duration {
        self.timeout * 3 / 4
    }

    /// Restore the `instant-acme` account for a registered identity
    async fn account(&self, identity: &Identity) -> Result<Account, AuthorityError> {
        let registration = identity.registration().ok_or_else(|| {
            AuthorityError::Registration(format!(
                "identity '{}' is not registered",
                identity.email()
            ))
        })?;
        let der = identity
            .key()
            .to_pkcs8_der()
            .map_err(|e| AuthorityError::Registration(format!("unusable account key: {}", e)))?;

        let directory = registration
            .directory
            .as_deref()
            .unwrap_or(self.endpoint.directory_url());
        let credentials: AccountCredentials = serde_json::from_value(serde_json::json!({
            "id": registration.uri,
            "key_pkcs8": URL_SAFE_NO_PAD.encode(der),
            "directory": directory,
        }))
        .map_err(|e| AuthorityError::Registration(format!("invalid account credentials: {}", e)))?;

        Ok(Account::from_credentials(credentials).await?)
    }

    async fn issue(&self, identity: &Identity, domain: &str) -> Result<CertificateBundle, AuthorityError> {
        let account = self.account(identity).await?;

        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AuthorityError::Order(e.to_string()))?;

        debug!(domain = %domain, "Created ACME order");

        // Dropping `published` before cleanup still removes its records
        let mut published = self.challenges.begin();
        let deadline = self.validation_deadline();
        let validation = tokio::time::timeout(deadline, self.validate(&mut order, domain, &mut published))
            .await
            .unwrap_or(Err(AuthorityError::Timeout {
                operation: "DNS-01 validation",
                elapsed: deadline,
            }));
        published.cleanup().await;
        validation?;

        self.finalize(&mut order, domain).await
    }

    /// Solve every pending authorization and wait for the order to become ready
    async fn validate(
        &self,
        order: &mut Order,
        domain: &str,
        published: &mut PublishedChallenges,
    ) -> Result<(), AuthorityError> {
        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| AuthorityError::Order(e.to_string()))?;

        for authz in &authorizations {
            match authz.status {
                AuthorizationStatus::Valid => continue,
                AuthorizationStatus::Pending => {}
                status => {
                    return Err(AuthorityError::Challenge {
                        domain: domain.to_string(),
                        message: format!("authorization is {:?}", status),
                    })
                }
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Dns01)
                .ok_or_else(|| AuthorityError::Challenge {
                    domain: domain.to_string(),
                    message: "no DNS-01 challenge offered".to_string(),
                })?;

            let key_authorization = order.key_authorization(challenge);
            let info = Dns01ChallengeInfo::new(domain, key_authorization.as_str(), &challenge.url);
            self.challenges.create_and_wait(published, info).await?;
        }

        for info in published.iter() {
            order
                .set_challenge_ready(&info.url)
                .await
                .map_err(|e| AuthorityError::Challenge {
                    domain: domain.to_string(),
                    message: e.to_string(),
                })?;
        }

        let mut delay = POLL_INITIAL_DELAY;
        loop {
            let state = order.refresh().await?;
            debug!(domain = %domain, status = ?state.status, "Order status");

            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    let message = state
                        .error
                        .as_ref()
                        .map(|e| format!("{:?}", e))
                        .unwrap_or_else(|| "order became invalid".to_string());
                    return Err(AuthorityError::Challenge {
                        domain: domain.to_string(),
                        message,
                    });
                }
                _ => {
                    sleep(delay).await;
                    delay = (delay * 2).min(POLL_MAX_DELAY);
                }
            }
        }
    }

    async fn finalize(&self, order: &mut Order, domain: &str) -> Result<CertificateBundle, AuthorityError> {
        let request = certificate_request(domain)?;

        if order.state().status != OrderStatus::Valid {
            order
                .finalize(&request.csr_der)
                .await
                .map_err(|e| AuthorityError::Finalization(e.to_string()))?;
            debug!(domain = %domain, "Order finalized, waiting for certificate");
        }

        let mut delay = Duration::from_secs(1);
        let chain = loop {
            match order
                .certificate()
                .await
                .map_err(|e| AuthorityError::Finalization(e.to_string()))?
            {
                Some(chain) => break chain,
                None => {
                    sleep(delay).await;
                    delay = (delay * 2).min(POLL_MAX_DELAY);
                }
            }
        };

        let cert_url = order.state().certificate.clone().unwrap_or_default();
        let bundle = CertificateBundle::from_chain(
            domain,
            &cert_url,
            &chain,
            request.key_pem.into_bytes(),
            request.csr_pem.into_bytes(),
        );

        // The chain must at least carry a readable leaf
        bundle
            .not_after()
            .map_err(|e| AuthorityError::CertificateParse(e.0))?;

        Ok(bundle)
    }
}

/// Fresh P-256 key and CSR for a single domain
fn certificate_request(domain: &str) -> Result<CertificateRequest, AuthorityError> {
    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| AuthorityError::Finalization(format!("key generation failed: {}", e)))?;
    let params = CertificateParams::new(vec![domain.to_string()])
        .map_err(|e| AuthorityError::Finalization(format!("invalid certificate params: {}", e)))?;
    let csr = params
        .serialize_request(&key)
        .map_err(|e| AuthorityError::Finalization(format!("CSR generation failed: {}", e)))?;
    let csr_pem = csr
        .pem()
        .map_err(|e| AuthorityError::Finalization(format!("CSR encoding failed: {}", e)))?;

    Ok(CertificateRequest {
        key_pem: key.serialize_pem(),
        csr_pem,
        csr_der: csr.der().to_vec(),
    })
}

/// Recover the account key `instant-acme` generated during registration
fn account_key(credentials: &AccountCredentials) -> Result<AccountKey, AuthorityError> {
    let value = serde_json::to_value(credentials)
        .map_err(|e| AuthorityError::Registration(format!("unreadable credentials: {}", e)))?;
    let encoded = value
        .get("key_pkcs8")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AuthorityError::Registration("credentials carry no key".to_string()))?;
    let der = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| AuthorityError::Registration(format!("invalid account key encoding: {}", e)))?;

    AccountKey::from_pkcs8_der(&der)
        .map_err(|e| AuthorityError::Registration(format!("invalid account key: {}", e)))
}

#[async_trait]
impl CertificateAuthority for AcmeAuthority {
    async fn register(&self, identity: &Identity) -> Result<Enrollment, AuthorityError> {
        let contact = format!("mailto:{}", identity.email());
        let directory = self.endpoint.directory_url();

        info!(email = %identity.email(), directory = %directory, "Creating new ACME account");

        let (account, credentials) = self
            .bounded("ACME registration", async {
                let contacts = [contact.as_str()];
                Account::create(
                    &NewAccount {
                        contact: &contacts,
                        terms_of_service_agreed: true,
                        only_return_existing: false,
                    },
                    directory,
                    None,
                )
                .await
                .map_err(|e| AuthorityError::Registration(e.to_string()))
            })
            .await?;

        let key = account_key(&credentials)?;
        let registration = Registration {
            uri: account.id().to_string(),
            contact: vec![contact],
            terms_of_service_agreed: true,
            directory: Some(directory.to_string()),
        };

        info!(account_url = %registration.uri, "Successfully created ACME account");
        Ok(Enrollment { registration, key })
    }

    async fn obtain(
        &self,
        identity: &Identity,
        domain: &str,
    ) -> Result<CertificateBundle, AuthorityError> {
        info!(
            domain = %domain,
            dns_provider = self.challenges.provider_name(),
            "Requesting certificate"
        );
        self.bounded("Certificate issuance", self.issue(identity, domain))
            .await
    }

    async fn renew(
        &self,
        identity: &Identity,
        previous: &CertificateBundle,
    ) -> Result<CertificateBundle, AuthorityError> {
        let expiry = previous
            .not_after()
            .map_err(|e| AuthorityError::CertificateParse(e.0))?;

        info!(domain = %previous.domain, previous_expiry = %expiry, "Renewing certificate");
        self.bounded("Certificate renewal", self.issue(identity, &previous.domain))
            .await
    }
}
