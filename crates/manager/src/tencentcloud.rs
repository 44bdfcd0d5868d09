//! Tencent Cloud API 3.0 client
//!
//! Every product API (CDN, DNSPod) is a JSON POST to
//! `https://<service>.tencentcloudapi.com/` signed with TC3-HMAC-SHA256.
//! Responses are wrapped in a `Response` envelope that carries either the
//! result fields or an `Error { Code, Message }`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "TC3-HMAC-SHA256";
const CONTENT_TYPE: &str = "application/json; charset=utf-8";
const SIGNED_HEADERS: &str = "content-type;host";

/// Errors returned by Tencent Cloud API calls
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid API client configuration: {0}")]
    Configuration(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{code}: {message} (request {request_id})")]
    Api {
        code: String,
        message: String,
        request_id: String,
    },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Error code reported by the API, e.g. `AuthFailure.SecretIdNotFound`
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether the credentials were rejected
    pub fn is_auth_failure(&self) -> bool {
        self.code().is_some_and(|code| code.starts_with("AuthFailure"))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Http(e.to_string())
        }
    }
}

/// Signed client for one Tencent Cloud product API
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    endpoint: Url,
    host: String,
    service: &'static str,
    version: &'static str,
    region: Option<String>,
    secret_id: String,
    secret_key: String,
}

impl ApiClient {
    /// Client for `https://<service>.tencentcloudapi.com/`
    pub fn new(
        service: &'static str,
        version: &'static str,
        region: Option<&str>,
        secret_id: &str,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let mut client = Self {
            http,
            endpoint: Url::parse("https://tencentcloudapi.com/")
                .map_err(|e| ApiError::Configuration(e.to_string()))?,
            host: String::new(),
            service,
            version,
            region: region.map(str::to_string),
            secret_id: secret_id.to_string(),
            secret_key: secret_key.to_string(),
        };
        client.set_endpoint(&format!("https://{}.tencentcloudapi.com/", service))?;
        Ok(client)
    }

    /// Send requests to another endpoint, e.g. a regional one or a test server
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self, ApiError> {
        self.set_endpoint(endpoint)?;
        Ok(self)
    }

    fn set_endpoint(&mut self, endpoint: &str) -> Result<(), ApiError> {
        let url = Url::parse(endpoint)
            .map_err(|e| ApiError::Configuration(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| ApiError::Configuration(format!("endpoint '{}' has no host", endpoint)))?;
        self.host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        self.endpoint = url;
        Ok(())
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Invoke `action` and decode the `Response` body
    pub async fn call<Req, Resp>(&self, action: &str, request: &Req) -> Result<Resp, ApiError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_string(request).map_err(|e| ApiError::Decode(e.to_string()))?;
        let timestamp = Utc::now().timestamp();
        let authorization = authorization(
            &self.secret_id,
            &self.secret_key,
            self.service,
            &self.host,
            timestamp,
            &payload,
        )?;

        trace!(service = self.service, action = %action, "Calling Tencent Cloud API");

        let mut builder = self
            .http
            .post(self.endpoint.clone())
            .header("Authorization", authorization)
            .header("Content-Type", CONTENT_TYPE)
            .header("Host", &self.host)
            .header("X-TC-Action", action)
            .header("X-TC-Timestamp", timestamp.to_string())
            .header("X-TC-Version", self.version);
        if let Some(region) = &self.region {
            builder = builder.header("X-TC-Region", region);
        }

        let response = builder.body(payload).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        decode_response(&body).inspect_err(|e| {
            debug!(service = self.service, action = %action, error = %e, "Tencent Cloud API call failed");
        })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Response")]
    response: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

fn decode_response<Resp: DeserializeOwned>(body: &str) -> Result<Resp, ApiError> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))?;

    if let Some(error) = envelope.response.get("Error") {
        let error: ErrorBody =
            serde_json::from_value(error.clone()).map_err(|e| ApiError::Decode(e.to_string()))?;
        let request_id = envelope
            .response
            .get("RequestId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        return Err(ApiError::Api {
            code: error.code,
            message: error.message,
            request_id,
        });
    }

    serde_json::from_value(envelope.response).map_err(|e| ApiError::Decode(e.to_string()))
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>, ApiError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ApiError::Configuration(format!("invalid signing key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Build the TC3-HMAC-SHA256 `Authorization` header for a JSON POST to `/`
pub fn authorization(
    secret_id: &str,
    secret_key: &str,
    service: &str,
    host: &str,
    timestamp: i64,
    payload: &str,
) -> Result<String, ApiError> {
    let date = DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| ApiError::Configuration(format!("invalid timestamp {}", timestamp)))?
        .format("%Y-%m-%d")
        .to_string();

    let canonical_request = format!(
        "POST\n/\n\ncontent-type:{}\nhost:{}\n\n{}\n{}",
        CONTENT_TYPE,
        host,
        SIGNED_HEADERS,
        sha256_hex(payload)
    );
    let credential_scope = format!("{}/{}/tc3_request", date, service);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        timestamp,
        credential_scope,
        sha256_hex(&canonical_request)
    );

    let secret_date = hmac_sha256(format!("TC3{}", secret_key).as_bytes(), &date)?;
    let secret_service = hmac_sha256(&secret_date, service)?;
    let secret_signing = hmac_sha256(&secret_service, "tc3_request")?;
    let signature = hex::encode(hmac_sha256(&secret_signing, &string_to_sign)?);

    Ok(format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, secret_id, credential_scope, SIGNED_HEADERS, signature
    ))
}
