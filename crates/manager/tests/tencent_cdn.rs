//! Tencent Cloud CDN adapter against a mock API endpoint

use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cdn_cert_manager::cdn::{CdnControlPlane, CdnError, CdnState, Expiry, HttpsUpdate, TencentCdnClient};

async fn client(server: &MockServer) -> TencentCdnClient {
    TencentCdnClient::new("ap-guangzhou", "AKIDEXAMPLE", "secret", Duration::from_secs(5))
        .unwrap()
        .with_endpoint(&server.uri())
        .unwrap()
}

fn describe_response(domains: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "Response": {
            "Domains": domains,
            "TotalNumber": 1,
            "RequestId": "req-1"
        }
    }))
}

#[tokio::test]
async fn test_describe_reads_https_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("X-TC-Action", "DescribeDomainsConfig"))
        .and(header("X-TC-Version", "2018-06-06"))
        .and(header("X-TC-Region", "ap-guangzhou"))
        .and(header_exists("Authorization"))
        .and(header_exists("X-TC-Timestamp"))
        .and(body_partial_json(json!({
            "Filters": [{ "Name": "domain", "Value": ["cdn.example.com"] }]
        })))
        .respond_with(describe_response(json!([{
            "Domain": "cdn.example.com",
            "Https": {
                "Switch": "on",
                "CertInfo": { "CertId": "abc", "ExpireTime": "2027-05-06 07:08:09" }
            }
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let state = CdnState::new(client(&server).await);
    let tls = state.describe("cdn.example.com").await.unwrap();

    assert!(tls.enabled);
    assert_eq!(
        tls.expiry,
        Some(Expiry::At(Utc.with_ymd_and_hms(2027, 5, 6, 7, 8, 9).unwrap()))
    );
}

#[tokio::test]
async fn test_describe_without_https() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("X-TC-Action", "DescribeDomainsConfig"))
        .respond_with(describe_response(json!([{ "Domain": "cdn.example.com" }])))
        .mount(&server)
        .await;

    let state = CdnState::new(client(&server).await);
    let tls = state.describe("cdn.example.com").await.unwrap();
    assert!(!tls.enabled);
    assert!(tls.expiry.is_none());
}

#[tokio::test]
async fn test_describe_unknown_domain() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("X-TC-Action", "DescribeDomainsConfig"))
        .respond_with(describe_response(json!([{ "Domain": "other.example.com" }])))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .https_config("cdn.example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, CdnError::DomainNotFound(d) if d == "cdn.example.com"));
}

#[tokio::test]
async fn test_auth_failure_is_credentials_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Response": {
                "Error": {
                    "Code": "AuthFailure.SecretIdNotFound",
                    "Message": "The SecretId is not found"
                },
                "RequestId": "req-2"
            }
        })))
        .mount(&server)
        .await;

    let state = CdnState::new(client(&server).await);
    assert!(matches!(
        state.verify_credentials("cdn.example.com").await,
        Err(CdnError::Credentials(_))
    ));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .https_config("cdn.example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, CdnError::Transient(_)));
}

#[tokio::test]
async fn test_update_uploads_certificate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("X-TC-Action", "UpdateDomainConfig"))
        .and(body_partial_json(json!({
            "Domain": "cdn.example.com",
            "Https": {
                "Switch": "on",
                "CertInfo": {
                    "Certificate": "CERT PEM",
                    "PrivateKey": "KEY PEM",
                    "ExpireTime": "2027-05-06 07:08:09",
                    "Message": "TENCENT CDN CERT MANAGER",
                    "From": "Let's Encrypt"
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Response": { "RequestId": "req-3" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let update = HttpsUpdate {
        certificate_pem: "CERT PEM".to_string(),
        private_key_pem: "KEY PEM".to_string(),
        expires_at: Utc.with_ymd_and_hms(2027, 5, 6, 7, 8, 9).unwrap(),
        issuer: "Let's Encrypt".to_string(),
        message: "TENCENT CDN CERT MANAGER".to_string(),
    };
    client(&server)
        .await
        .update_https("cdn.example.com", &update)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejected_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("X-TC-Action", "UpdateDomainConfig"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Response": {
                "Error": {
                    "Code": "InvalidParameter.CdnCertInfoNotMatch",
                    "Message": "certificate and key do not match"
                },
                "RequestId": "req-4"
            }
        })))
        .mount(&server)
        .await;

    let update = HttpsUpdate {
        certificate_pem: "CERT PEM".to_string(),
        private_key_pem: "OTHER KEY".to_string(),
        expires_at: Utc::now(),
        issuer: "Let's Encrypt".to_string(),
        message: "TENCENT CDN CERT MANAGER".to_string(),
    };
    let err = client(&server)
        .await
        .update_https("cdn.example.com", &update)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CdnError::Upload { ref domain, ref message }
            if domain == "cdn.example.com" && message.contains("CdnCertInfoNotMatch")
    ));
}
