//! Certificate bundles

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x509_parser::pem::parse_x509_pem;

const PEM_CERT_END: &str = "-----END CERTIFICATE-----";

/// A leaf certificate could not be read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to parse certificate: {0}")]
pub struct CertificateParseError(pub String);

/// One issued certificate for one domain
///
/// Artifacts are kept as raw bytes so a save/load round trip is byte-identical.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub domain: String,
    pub cert_url: String,
    pub cert_stable_url: String,
    /// PEM private key
    pub private_key: Vec<u8>,
    /// PEM certificate signing request
    pub csr: Vec<u8>,
    /// Full chain, leaf first
    pub certificate: Vec<u8>,
    /// Chain without the leaf
    pub issuer_certificate: Vec<u8>,
}

/// `cert.json` contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateMeta {
    pub domain: String,
    #[serde(default)]
    pub cert_url: String,
    #[serde(default)]
    pub cert_stable_url: String,
}

impl CertificateBundle {
    /// Build a bundle from a downloaded PEM chain
    pub fn from_chain(
        domain: &str,
        cert_url: &str,
        chain_pem: &str,
        private_key: Vec<u8>,
        csr: Vec<u8>,
    ) -> Self {
        let (_, issuers) = split_chain(chain_pem);
        Self {
            domain: domain.to_string(),
            cert_url: cert_url.to_string(),
            cert_stable_url: cert_url.to_string(),
            private_key,
            csr,
            certificate: chain_pem.as_bytes().to_vec(),
            issuer_certificate: issuers.into_bytes(),
        }
    }

    /// Expiry of the leaf certificate
    pub fn not_after(&self) -> Result<DateTime<Utc>, CertificateParseError> {
        not_after(&self.certificate)
    }

    pub fn meta(&self) -> CertificateMeta {
        CertificateMeta {
            domain: self.domain.clone(),
            cert_url: self.cert_url.clone(),
            cert_stable_url: self.cert_stable_url.clone(),
        }
    }

    /// Certificate chain as text for APIs that take PEM strings
    pub fn certificate_pem(&self) -> String {
        String::from_utf8_lossy(&self.certificate).into_owned()
    }

    pub fn private_key_pem(&self) -> String {
        String::from_utf8_lossy(&self.private_key).into_owned()
    }
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("domain", &self.domain)
            .field("cert_url", &self.cert_url)
            .field("certificate_len", &self.certificate.len())
            .field("issuer_certificate_len", &self.issuer_certificate.len())
            .finish_non_exhaustive()
    }
}

/// Parse the notAfter of the first certificate in a PEM buffer
pub fn not_after(pem: &[u8]) -> Result<DateTime<Utc>, CertificateParseError> {
    let (_, pem) = parse_x509_pem(pem).map_err(|e| CertificateParseError(e.to_string()))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| CertificateParseError(e.to_string()))?;

    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
        CertificateParseError(format!("notAfter {} is out of range", timestamp))
    })
}

/// Split a PEM chain into the leaf and the remaining issuer chain
pub fn split_chain(chain_pem: &str) -> (String, String) {
    match chain_pem.find(PEM_CERT_END) {
        Some(pos) => {
            let end = pos + PEM_CERT_END.len();
            let leaf = format!("{}\n", chain_pem[..end].trim_start());
            let issuers = chain_pem[end..].trim_start().to_string();
            (leaf, issuers)
        }
        None => (chain_pem.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};

    fn self_signed(domain: &str, year: i32) -> String {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec![domain.to_string()]).unwrap();
        params.not_after = rcgen::date_time_ymd(year, 6, 1);
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn test_not_after_reads_leaf() {
        let chain = format!("{}{}", self_signed("a.example.com", 2031), self_signed("issuer", 2040));
        let expiry = not_after(chain.as_bytes()).unwrap();
        assert_eq!(expiry.format("%Y-%m-%d").to_string(), "2031-06-01");
    }

    #[test]
    fn test_not_after_rejects_garbage() {
        assert!(not_after(b"hello").is_err());
    }

    #[test]
    fn test_split_chain() {
        let leaf = self_signed("a.example.com", 2031);
        let issuer = self_signed("issuer", 2040);
        let chain = format!("{}\n{}", leaf, issuer);

        let (got_leaf, got_issuer) = split_chain(&chain);
        assert_eq!(got_leaf.trim(), leaf.trim());
        assert_eq!(got_issuer.trim(), issuer.trim());

        let (only, rest) = split_chain(&leaf);
        assert_eq!(only.trim(), leaf.trim());
        assert!(rest.is_empty());
    }

    #[test]
    fn test_from_chain_keeps_full_chain() {
        let leaf = self_signed("a.example.com", 2031);
        let issuer = self_signed("issuer", 2040);
        let chain = format!("{}{}", leaf, issuer);

        let bundle = CertificateBundle::from_chain(
            "a.example.com",
            "https://ca.example/cert/1",
            &chain,
            b"key".to_vec(),
            b"csr".to_vec(),
        );
        assert_eq!(bundle.certificate, chain.as_bytes());
        assert_eq!(bundle.issuer_certificate, issuer.trim_start().as_bytes());
        assert_eq!(bundle.meta().cert_stable_url, "https://ca.example/cert/1");
    }

    #[test]
    fn test_meta_json_names() {
        let meta = CertificateMeta {
            domain: "a.example.com".to_string(),
            cert_url: "u".to_string(),
            cert_stable_url: "s".to_string(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["certUrl"], "u");
        assert_eq!(json["certStableUrl"], "s");
    }

    #[test]
    fn test_debug_hides_key() {
        let bundle = CertificateBundle::from_chain("a.example.com", "", "", b"SECRET".to_vec(), vec![]);
        assert!(!format!("{:?}", bundle).contains("SECRET"));
    }
}
