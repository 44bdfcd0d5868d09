//! TLS state as seen by the lifecycle scheduler

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, info, warn};

use super::{CdnControlPlane, CdnError, HttpsConfig, HttpsUpdate};
use crate::acme::CertificateBundle;

/// Expiry format used by the CDN API, always read and written as UTC
pub const EXPIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Issuer label shown in the CDN console
pub const CERTIFICATE_ISSUER: &str = "Let's Encrypt";

/// Note attached to every uploaded certificate
pub const UPLOAD_MESSAGE: &str = "TENCENT CDN CERT MANAGER";

/// Expiry of the deployed certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expiry {
    At(DateTime<Utc>),
    /// The CDN reported a value we could not read
    Unparseable(String),
}

/// TLS state of one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsState {
    /// HTTPS is switched on with a certificate attached
    pub enabled: bool,
    pub expiry: Option<Expiry>,
}

impl TlsState {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            expiry: None,
        }
    }
}

impl From<HttpsConfig> for TlsState {
    fn from(config: HttpsConfig) -> Self {
        match config.certificate {
            Some(cert) if config.enabled => TlsState {
                enabled: true,
                expiry: cert.expire_time.as_deref().map(parse_expire_time),
            },
            _ => TlsState::disabled(),
        }
    }
}

/// Read a CDN expiry string
pub fn parse_expire_time(value: &str) -> Expiry {
    match NaiveDateTime::parse_from_str(value.trim(), EXPIRE_TIME_FORMAT) {
        Ok(naive) => Expiry::At(naive.and_utc()),
        Err(_) => Expiry::Unparseable(value.to_string()),
    }
}

/// Reads and writes the HTTPS state of CDN domains
#[derive(Debug)]
pub struct CdnState<C> {
    control: C,
}

impl<C: CdnControlPlane> CdnState<C> {
    pub fn new(control: C) -> Self {
        Self { control }
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub async fn describe(&self, domain: &str) -> Result<TlsState, CdnError> {
        let config = self.control.https_config(domain).await?;
        let state = TlsState::from(config);

        if let Some(Expiry::Unparseable(raw)) = &state.expiry {
            warn!(domain = %domain, expire_time = %raw, "Unreadable certificate expiry on CDN");
        }
        debug!(domain = %domain, enabled = state.enabled, expiry = ?state.expiry, "CDN TLS state");
        Ok(state)
    }

    /// Deploy a bundle and switch HTTPS on
    ///
    /// The expiry sent along is read from the bundle's leaf certificate.
    pub async fn push(
        &self,
        domain: &str,
        bundle: &CertificateBundle,
    ) -> Result<DateTime<Utc>, CdnError> {
        let expires_at = bundle
            .not_after()
            .map_err(|e| CdnError::CertificateParse(e.0))?;

        let update = HttpsUpdate {
            certificate_pem: bundle.certificate_pem(),
            private_key_pem: bundle.private_key_pem(),
            expires_at,
            issuer: CERTIFICATE_ISSUER.to_string(),
            message: UPLOAD_MESSAGE.to_string(),
        };
        self.control.update_https(domain, &update).await?;

        info!(domain = %domain, expires_at = %expires_at, "Certificate deployed to CDN");
        Ok(expires_at)
    }

    /// Startup probe of the CDN credentials
    ///
    /// Only a credential rejection is an error; anything else is left for
    /// the domain cycles to report.
    pub async fn verify_credentials(&self, domain: &str) -> Result<(), CdnError> {
        match self.control.https_config(domain).await {
            Ok(_) => Ok(()),
            Err(e @ CdnError::Credentials(_)) => Err(e),
            Err(e) => {
                warn!(domain = %domain, error = %e, "CDN credential probe inconclusive");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use rcgen::{CertificateParams, KeyPair};

    use super::*;
    use crate::cdn::DeployedCertificate;

    #[derive(Default)]
    struct FakeCdn {
        config: Option<HttpsConfig>,
        credentials_rejected: bool,
        uploads: Mutex<Vec<(String, HttpsUpdate)>>,
    }

    #[async_trait]
    impl CdnControlPlane for FakeCdn {
        async fn https_config(&self, domain: &str) -> Result<HttpsConfig, CdnError> {
            if self.credentials_rejected {
                return Err(CdnError::Credentials("AuthFailure".to_string()));
            }
            self.config
                .clone()
                .ok_or_else(|| CdnError::DomainNotFound(domain.to_string()))
        }

        async fn update_https(&self, domain: &str, update: &HttpsUpdate) -> Result<(), CdnError> {
            self.uploads.lock().push((domain.to_string(), update.clone()));
            Ok(())
        }
    }

    fn deployed(expire_time: &str) -> HttpsConfig {
        HttpsConfig {
            enabled: true,
            certificate: Some(DeployedCertificate {
                cert_id: Some("abc".to_string()),
                expire_time: Some(expire_time.to_string()),
            }),
        }
    }

    #[test]
    fn test_parse_expire_time() {
        assert_eq!(
            parse_expire_time("2027-03-04 05:06:07"),
            Expiry::At(Utc.with_ymd_and_hms(2027, 3, 4, 5, 6, 7).unwrap())
        );
        assert_eq!(
            parse_expire_time("next tuesday"),
            Expiry::Unparseable("next tuesday".to_string())
        );
    }

    #[test]
    fn test_tls_requires_switch_and_certificate() {
        let mut config = deployed("2027-03-04 05:06:07");
        assert!(TlsState::from(config.clone()).enabled);

        config.enabled = false;
        assert_eq!(TlsState::from(config), TlsState::disabled());

        let no_cert = HttpsConfig {
            enabled: true,
            certificate: None,
        };
        assert_eq!(TlsState::from(no_cert), TlsState::disabled());
    }

    #[tokio::test]
    async fn test_describe_missing_domain() {
        let state = CdnState::new(FakeCdn::default());
        let err = state.describe("gone.example.com").await.unwrap_err();
        assert!(matches!(err, CdnError::DomainNotFound(d) if d == "gone.example.com"));
    }

    #[tokio::test]
    async fn test_describe_unparseable_expiry() {
        let state = CdnState::new(FakeCdn {
            config: Some(deployed("soon")),
            ..Default::default()
        });
        let tls = state.describe("cdn.example.com").await.unwrap();
        assert!(tls.enabled);
        assert_eq!(tls.expiry, Some(Expiry::Unparseable("soon".to_string())));
    }

    #[tokio::test]
    async fn test_push_uses_leaf_expiry() {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["cdn.example.com".to_string()]).unwrap();
        params.not_after = rcgen::date_time_ymd(2031, 7, 9);
        let pem = params.self_signed(&key).unwrap().pem();
        let bundle = CertificateBundle::from_chain(
            "cdn.example.com",
            "",
            &pem,
            key.serialize_pem().into_bytes(),
            Vec::new(),
        );

        let state = CdnState::new(FakeCdn::default());
        let expires_at = state.push("cdn.example.com", &bundle).await.unwrap();
        assert_eq!(expires_at, Utc.with_ymd_and_hms(2031, 7, 9, 0, 0, 0).unwrap());

        let uploads = state.control().uploads.lock();
        let (domain, update) = &uploads[0];
        assert_eq!(domain, "cdn.example.com");
        assert_eq!(update.expires_at, expires_at);
        assert_eq!(update.issuer, "Let's Encrypt");
        assert_eq!(update.message, "TENCENT CDN CERT MANAGER");
        assert_eq!(update.certificate_pem, pem);
    }

    #[tokio::test]
    async fn test_push_rejects_unreadable_certificate() {
        let bundle = CertificateBundle::from_chain("cdn.example.com", "", "junk", Vec::new(), Vec::new());
        let state = CdnState::new(FakeCdn::default());
        let err = state.push("cdn.example.com", &bundle).await.unwrap_err();
        assert!(matches!(err, CdnError::CertificateParse(_)));
        assert!(state.control().uploads.lock().is_empty());
    }

    #[tokio::test]
    async fn test_verify_credentials() {
        let rejected = CdnState::new(FakeCdn {
            credentials_rejected: true,
            ..Default::default()
        });
        assert!(matches!(
            rejected.verify_credentials("cdn.example.com").await,
            Err(CdnError::Credentials(_))
        ));

        // A missing domain says nothing about the credentials
        let missing = CdnState::new(FakeCdn::default());
        assert!(missing.verify_credentials("cdn.example.com").await.is_ok());
    }
}
