//! Tencent Cloud CDN adapter
//!
//! Uses `DescribeDomainsConfig` to read a domain's HTTPS settings and
//! `UpdateDomainConfig` to deploy a certificate, both CDN API `2018-06-06`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::EXPIRE_TIME_FORMAT;
use super::{CdnControlPlane, CdnError, DeployedCertificate, HttpsConfig, HttpsUpdate};
use crate::tencentcloud::{ApiClient, ApiError};

const SERVICE: &str = "cdn";
const VERSION: &str = "2018-06-06";

/// CDN API client
#[derive(Debug, Clone)]
pub struct TencentCdnClient {
    api: ApiClient,
}

impl TencentCdnClient {
    pub fn new(
        region: &str,
        secret_id: &str,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<Self, CdnError> {
        let api = ApiClient::new(SERVICE, VERSION, Some(region), secret_id, secret_key, timeout)
            .map_err(|e| CdnError::Configuration(e.to_string()))?;
        Ok(Self { api })
    }

    /// Point the client at another API endpoint
    pub fn with_endpoint(self, endpoint: &str) -> Result<Self, CdnError> {
        let api = self
            .api
            .with_endpoint(endpoint)
            .map_err(|e| CdnError::Configuration(e.to_string()))?;
        Ok(Self { api })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeDomainsConfigRequest<'a> {
    filters: [DomainFilter<'a>; 1],
    limit: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DomainFilter<'a> {
    name: &'a str,
    value: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeDomainsConfigResponse {
    #[serde(default)]
    domains: Vec<DetailDomain>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DetailDomain {
    domain: String,
    #[serde(default)]
    https: Option<HttpsSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HttpsSection {
    #[serde(default)]
    switch: Option<String>,
    #[serde(default)]
    cert_info: Option<ServerCert>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServerCert {
    #[serde(default)]
    cert_id: Option<String>,
    #[serde(default)]
    expire_time: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpdateDomainConfigRequest<'a> {
    domain: &'a str,
    https: HttpsUpload<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HttpsUpload<'a> {
    switch: &'static str,
    cert_info: CertUpload<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CertUpload<'a> {
    certificate: &'a str,
    private_key: &'a str,
    expire_time: String,
    message: &'a str,
    from: &'a str,
}

#[derive(Debug, Deserialize)]
struct Empty {}

fn describe_error(domain: &str, e: ApiError) -> CdnError {
    if e.is_auth_failure() {
        return CdnError::Credentials(e.to_string());
    }
    match e.code() {
        Some(code) if code.starts_with("ResourceNotFound") => {
            CdnError::DomainNotFound(domain.to_string())
        }
        _ => CdnError::Transient(e.to_string()),
    }
}

impl From<HttpsSection> for HttpsConfig {
    fn from(https: HttpsSection) -> Self {
        HttpsConfig {
            enabled: https
                .switch
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("on")),
            certificate: https.cert_info.map(|cert| DeployedCertificate {
                cert_id: cert.cert_id.filter(|id| !id.is_empty()),
                expire_time: cert.expire_time.filter(|t| !t.is_empty()),
            }),
        }
    }
}

#[async_trait]
impl CdnControlPlane for TencentCdnClient {
    async fn https_config(&self, domain: &str) -> Result<HttpsConfig, CdnError> {
        let request = DescribeDomainsConfigRequest {
            filters: [DomainFilter {
                name: "domain",
                value: [domain],
            }],
            limit: 10,
        };

        let response: DescribeDomainsConfigResponse = self
            .api
            .call("DescribeDomainsConfig", &request)
            .await
            .map_err(|e| describe_error(domain, e))?;

        let detail = response
            .domains
            .into_iter()
            .find(|d| d.domain.eq_ignore_ascii_case(domain))
            .ok_or_else(|| CdnError::DomainNotFound(domain.to_string()))?;

        debug!(domain = %domain, has_https = detail.https.is_some(), "Fetched CDN domain config");
        Ok(detail.https.map(HttpsConfig::from).unwrap_or_default())
    }

    async fn update_https(&self, domain: &str, update: &HttpsUpdate) -> Result<(), CdnError> {
        let request = UpdateDomainConfigRequest {
            domain,
            https: HttpsUpload {
                switch: "on",
                cert_info: CertUpload {
                    certificate: &update.certificate_pem,
                    private_key: &update.private_key_pem,
                    expire_time: update.expires_at.format(EXPIRE_TIME_FORMAT).to_string(),
                    message: &update.message,
                    from: &update.issuer,
                },
            },
        };

        let _: Empty = self
            .api
            .call("UpdateDomainConfig", &request)
            .await
            .map_err(|e| {
                if e.is_auth_failure() {
                    CdnError::Credentials(e.to_string())
                } else {
                    CdnError::Upload {
                        domain: domain.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn test_describe_request_shape() {
        let request = DescribeDomainsConfigRequest {
            filters: [DomainFilter {
                name: "domain",
                value: ["cdn.example.com"],
            }],
            limit: 10,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["Filters"][0]["Name"], "domain");
        assert_eq!(json["Filters"][0]["Value"][0], "cdn.example.com");
        assert_eq!(json["Limit"], 10);
    }

    #[test]
    fn test_update_request_shape() {
        let request = UpdateDomainConfigRequest {
            domain: "cdn.example.com",
            https: HttpsUpload {
                switch: "on",
                cert_info: CertUpload {
                    certificate: "CERT",
                    private_key: "KEY",
                    expire_time: Utc
                        .with_ymd_and_hms(2027, 1, 2, 3, 4, 5)
                        .unwrap()
                        .format(EXPIRE_TIME_FORMAT)
                        .to_string(),
                    message: "m",
                    from: "Let's Encrypt",
                },
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["Domain"], "cdn.example.com");
        assert_eq!(json["Https"]["Switch"], "on");
        assert_eq!(json["Https"]["CertInfo"]["Certificate"], "CERT");
        assert_eq!(json["Https"]["CertInfo"]["PrivateKey"], "KEY");
        assert_eq!(json["Https"]["CertInfo"]["ExpireTime"], "2027-01-02 03:04:05");
        assert_eq!(json["Https"]["CertInfo"]["From"], "Let's Encrypt");
    }

    #[test]
    fn test_https_section_mapping() {
        let section: HttpsSection = serde_json::from_value(serde_json::json!({
            "Switch": "on",
            "CertInfo": { "CertId": "", "ExpireTime": "2027-01-02 03:04:05" }
        }))
        .unwrap();
        let config = HttpsConfig::from(section);
        assert!(config.enabled);
        let cert = config.certificate.unwrap();
        assert_eq!(cert.cert_id, None);
        assert_eq!(cert.expire_time.as_deref(), Some("2027-01-02 03:04:05"));

        let off: HttpsSection = serde_json::from_value(serde_json::json!({ "Switch": "off" })).unwrap();
        let config = HttpsConfig::from(off);
        assert!(!config.enabled);
        assert!(config.certificate.is_none());
    }

    #[test]
    fn test_describe_error_mapping() {
        let auth = ApiError::Api {
            code: "AuthFailure.SignatureFailure".to_string(),
            message: "bad".to_string(),
            request_id: "r".to_string(),
        };
        assert!(matches!(describe_error("a.example.com", auth), CdnError::Credentials(_)));

        let missing = ApiError::Api {
            code: "ResourceNotFound.CdnHostNotExists".to_string(),
            message: "none".to_string(),
            request_id: "r".to_string(),
        };
        assert!(matches!(
            describe_error("a.example.com", missing),
            CdnError::DomainNotFound(d) if d == "a.example.com"
        ));

        assert!(matches!(
            describe_error("a.example.com", ApiError::Timeout),
            CdnError::Transient(_)
        ));
    }
}
