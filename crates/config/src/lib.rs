//! Configuration for the CDN certificate manager
//!
//! All settings come from the process environment, optionally seeded from a
//! `.env` file by [`load_env_file`]. Loading happens in two
//! steps: `envy` deserializes the raw variables, then [`Settings::from_vars`]
//! applies defaults, converts them into typed values and validates the
//! result. Nothing here is mutated after startup.
//!
//! # Environment
//!
//! ```text
//! CERT_MANAGER_EMAIL=admin@example.com
//! CERT_MANAGER_DOMAINS=cdn.example.com,static.example.com
//! CERT_MANAGER_INTERVAL=@hourly
//! CERT_MANAGER_DAYS=30
//! CA_DIR_URL=https://acme-v02.api.letsencrypt.org/directory
//! DNS_PROVIDER=cloudflare
//! CLOUDFLARE_DNS_API_TOKEN=...
//! TENCENT_REGION=ap-guangzhou
//! TENCENT_API_SECRET_ID=...
//! TENCENT_API_SECRET_KEY=...
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing::trace;
use validator::Validate;

mod schedule;

pub use schedule::{parse_duration, CronSchedule, Schedule, ScheduleError};

/// Let's Encrypt production directory URL
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Errors raised while loading configuration. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting {var}, e.g. {example}")]
    Missing {
        var: &'static str,
        example: &'static str,
    },

    #[error("Invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },

    #[error("Failed to read environment: {0}")]
    Environment(#[from] envy::Error),

    #[error("Failed to load env file {path}: {source}")]
    EnvFile {
        path: String,
        #[source]
        source: dotenvy::Error,
    },

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid CERT_MANAGER_INTERVAL: {0}")]
    Schedule(#[from] ScheduleError),
}

/// A credential value that never shows up in logs
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}' (expected text or json)", other)),
        }
    }
}

/// DNS provider used to solve DNS-01 challenges
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsProviderSettings {
    Cloudflare {
        api_token: Secret,
    },
    /// Tencent Cloud DNSPod
    TencentCloud {
        secret_id: String,
        secret_key: Secret,
    },
}

impl DnsProviderSettings {
    pub fn name(&self) -> &'static str {
        match self {
            DnsProviderSettings::Cloudflare { .. } => "cloudflare",
            DnsProviderSettings::TencentCloud { .. } => "tencentcloud",
        }
    }
}

/// DNS-01 challenge settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsSettings {
    pub provider: DnsProviderSettings,
    /// Maximum time to wait for a TXT record to become visible
    pub propagation_timeout_secs: u64,
}

/// Tencent Cloud CDN API settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnSettings {
    pub region: String,
    pub secret_id: String,
    pub secret_key: Secret,
}

/// Fully resolved and validated settings
#[derive(Debug, Clone, Validate)]
pub struct Settings {
    /// ACME account email
    #[validate(email)]
    pub email: String,

    /// Domains to keep covered, in configuration order
    #[validate(length(min = 1))]
    pub domains: Vec<String>,

    /// Shared schedule for every domain monitor
    pub schedule: Schedule,

    /// Renew when the CDN reports fewer days than this before expiry
    #[validate(range(min = 1, max = 365))]
    pub renew_before_days: u32,

    /// Root of the persisted account and certificate state
    pub data_dir: PathBuf,

    /// ACME directory URL
    #[validate(url)]
    pub ca_directory_url: String,

    /// Upper bound for a single registration, issuance or renewal
    #[validate(range(min = 1))]
    pub authority_timeout_secs: u64,

    pub log_format: LogFormat,

    pub dns: DnsSettings,

    pub cdn: CdnSettings,
}

/// Raw environment, as deserialized by `envy` (keys are matched lowercased)
#[derive(Debug, Deserialize)]
struct RawEnv {
    cert_manager_email: Option<String>,
    #[serde(default)]
    cert_manager_domains: Vec<String>,
    cert_manager_interval: Option<String>,
    cert_manager_days: Option<u32>,
    cert_manager_data_dir: Option<String>,
    cert_manager_authority_timeout: Option<u64>,
    cert_manager_log_format: Option<String>,
    ca_dir_url: Option<String>,
    dns_provider: Option<String>,
    dns_propagation_timeout: Option<u64>,
    cloudflare_dns_api_token: Option<String>,
    tencentcloud_secret_id: Option<String>,
    tencentcloud_secret_key: Option<String>,
    tencent_region: Option<String>,
    tencent_api_secret_id: Option<String>,
    tencent_api_secret_key: Option<String>,
}

fn default_schedule() -> &'static str {
    "@hourly"
}

fn default_renew_before_days() -> u32 {
    30
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_authority_timeout() -> u64 {
    600
}

fn default_propagation_timeout() -> u64 {
    120
}

/// Treat unset and blank variables alike
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load `KEY=VALUE` lines from `path` into the process environment
///
/// Variables already set in the environment win. Returns `false` when the
/// file does not exist.
pub fn load_env_file(path: &Path) -> Result<bool, ConfigError> {
    if !path.exists() {
        return Ok(false);
    }

    dotenvy::from_path(path).map_err(|source| ConfigError::EnvFile {
        path: path.display().to_string(),
        source,
    })?;
    Ok(true)
}

/// The account email names a directory under the CA's accounts root
fn check_email(email: &str) -> Result<(), ConfigError> {
    if email.contains('/') || email.contains('\\') || email.starts_with('.') {
        return Err(ConfigError::Invalid {
            var: "CERT_MANAGER_EMAIL",
            message: format!("'{}' cannot be used as an account name", email),
        });
    }
    Ok(())
}

fn required(
    value: Option<String>,
    var: &'static str,
    example: &'static str,
) -> Result<String, ConfigError> {
    non_empty(value).ok_or(ConfigError::Missing { var, example })
}

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Load settings from an explicit set of variables
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let raw: RawEnv = envy::from_iter(vars.into_iter())?;
        let settings = Self::from_raw(raw)?;
        settings.validate()?;

        trace!(
            domains = settings.domains.len(),
            schedule = %settings.schedule,
            renew_before_days = settings.renew_before_days,
            dns_provider = settings.dns.provider.name(),
            "Loaded configuration"
        );

        Ok(settings)
    }

    fn from_raw(raw: RawEnv) -> Result<Self, ConfigError> {
        let email = required(
            raw.cert_manager_email,
            "CERT_MANAGER_EMAIL",
            "CERT_MANAGER_EMAIL=admin@example.com",
        )?;
        check_email(&email)?;

        let domains = parse_domains(raw.cert_manager_domains)?;

        let interval = non_empty(raw.cert_manager_interval);
        let schedule: Schedule = interval
            .as_deref()
            .unwrap_or_else(|| default_schedule())
            .parse()?;

        let log_format = match non_empty(raw.cert_manager_log_format) {
            Some(value) => value.parse().map_err(|message| ConfigError::Invalid {
                var: "CERT_MANAGER_LOG_FORMAT",
                message,
            })?,
            None => LogFormat::default(),
        };

        let cdn = CdnSettings {
            region: required(raw.tencent_region, "TENCENT_REGION", "TENCENT_REGION=ap-guangzhou")?,
            secret_id: required(
                raw.tencent_api_secret_id,
                "TENCENT_API_SECRET_ID",
                "TENCENT_API_SECRET_ID=AKID...",
            )?,
            secret_key: Secret::new(required(
                raw.tencent_api_secret_key,
                "TENCENT_API_SECRET_KEY",
                "TENCENT_API_SECRET_KEY=...",
            )?),
        };

        let provider_name = required(
            raw.dns_provider,
            "DNS_PROVIDER",
            "DNS_PROVIDER=cloudflare",
        )?;
        let provider = match provider_name.to_ascii_lowercase().as_str() {
            "cloudflare" => DnsProviderSettings::Cloudflare {
                api_token: Secret::new(required(
                    raw.cloudflare_dns_api_token,
                    "CLOUDFLARE_DNS_API_TOKEN",
                    "CLOUDFLARE_DNS_API_TOKEN=...",
                )?),
            },
            // DNSPod falls back to the CDN credentials when no dedicated pair is set
            "tencentcloud" => DnsProviderSettings::TencentCloud {
                secret_id: non_empty(raw.tencentcloud_secret_id)
                    .unwrap_or_else(|| cdn.secret_id.clone()),
                secret_key: non_empty(raw.tencentcloud_secret_key)
                    .map(Secret::new)
                    .unwrap_or_else(|| cdn.secret_key.clone()),
            },
            "alidns" => {
                return Err(ConfigError::Invalid {
                    var: "DNS_PROVIDER",
                    message: "alidns is no longer supported, use cloudflare or tencentcloud"
                        .to_string(),
                })
            }
            other => {
                return Err(ConfigError::Invalid {
                    var: "DNS_PROVIDER",
                    message: format!(
                        "unsupported DNS provider '{}' (expected cloudflare or tencentcloud)",
                        other
                    ),
                })
            }
        };

        let ca_directory_url =
            non_empty(raw.ca_dir_url).unwrap_or_else(|| LETSENCRYPT_STAGING.to_string());
        match url::Url::parse(&ca_directory_url) {
            Ok(parsed) if parsed.host_str().is_some() => {}
            Ok(_) => {
                return Err(ConfigError::Invalid {
                    var: "CA_DIR_URL",
                    message: format!("'{}' has no host", ca_directory_url),
                })
            }
            Err(e) => {
                return Err(ConfigError::Invalid {
                    var: "CA_DIR_URL",
                    message: format!("'{}': {}", ca_directory_url, e),
                })
            }
        }

        Ok(Settings {
            email,
            domains,
            schedule,
            renew_before_days: raw
                .cert_manager_days
                .unwrap_or_else(default_renew_before_days),
            data_dir: non_empty(raw.cert_manager_data_dir)
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            ca_directory_url,
            authority_timeout_secs: raw
                .cert_manager_authority_timeout
                .unwrap_or_else(default_authority_timeout),
            log_format,
            dns: DnsSettings {
                provider,
                propagation_timeout_secs: raw
                    .dns_propagation_timeout
                    .unwrap_or_else(default_propagation_timeout),
            },
            cdn,
        })
    }

    /// Whether the configured directory is a Let's Encrypt staging endpoint
    pub fn is_staging(&self) -> bool {
        self.ca_directory_url.contains("staging")
    }
}

/// Normalize the comma separated domain list
///
/// Entries are trimmed and lowercased, blanks are dropped, and duplicates
/// are rejected since each domain gets exactly one monitor.
fn parse_domains(raw: Vec<String>) -> Result<Vec<String>, ConfigError> {
    let mut domains: Vec<String> = Vec::new();

    for entry in raw {
        let domain = entry.trim().trim_end_matches('.').to_ascii_lowercase();
        if domain.is_empty() {
            continue;
        }
        if domain.contains('/') || domain.contains('\\') || domain.starts_with('.') {
            return Err(ConfigError::Invalid {
                var: "CERT_MANAGER_DOMAINS",
                message: format!("'{}' is not a domain name", domain),
            });
        }
        if domains.contains(&domain) {
            return Err(ConfigError::Invalid {
                var: "CERT_MANAGER_DOMAINS",
                message: format!("'{}' is listed more than once", domain),
            });
        }
        domains.push(domain);
    }

    if domains.is_empty() {
        return Err(ConfigError::Missing {
            var: "CERT_MANAGER_DOMAINS",
            example: "CERT_MANAGER_DOMAINS=cdn.example.com,static.example.com",
        });
    }

    Ok(domains)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn base_vars() -> Vec<(String, String)> {
        [
            ("CERT_MANAGER_EMAIL", "admin@example.com"),
            ("CERT_MANAGER_DOMAINS", "a.example.com, B.example.com"),
            ("DNS_PROVIDER", "cloudflare"),
            ("CLOUDFLARE_DNS_API_TOKEN", "cf-token"),
            ("TENCENT_REGION", "ap-guangzhou"),
            ("TENCENT_API_SECRET_ID", "AKIDexample"),
            ("TENCENT_API_SECRET_KEY", "secret"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn with(mut vars: Vec<(String, String)>, key: &str, value: &str) -> Vec<(String, String)> {
        vars.retain(|(k, _)| k != key);
        vars.push((key.to_string(), value.to_string()));
        vars
    }

    fn without(mut vars: Vec<(String, String)>, key: &str) -> Vec<(String, String)> {
        vars.retain(|(k, _)| k != key);
        vars
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_vars(base_vars()).unwrap();

        assert_eq!(settings.email, "admin@example.com");
        assert_eq!(settings.domains, vec!["a.example.com", "b.example.com"]);
        assert_eq!(settings.schedule, Schedule::Hourly);
        assert_eq!(settings.renew_before_days, 30);
        assert_eq!(settings.ca_directory_url, LETSENCRYPT_STAGING);
        assert!(settings.is_staging());
        assert_eq!(settings.data_dir, PathBuf::from("data"));
        assert_eq!(settings.authority_timeout_secs, 600);
        assert_eq!(settings.log_format, LogFormat::Text);
        assert_eq!(settings.dns.propagation_timeout_secs, 120);
        assert_eq!(settings.dns.provider.name(), "cloudflare");
    }

    #[test]
    fn test_overrides() {
        let vars = with(base_vars(), "CERT_MANAGER_INTERVAL", "@every 30m");
        let vars = with(vars, "CERT_MANAGER_DAYS", "14");
        let vars = with(vars, "CA_DIR_URL", LETSENCRYPT_PRODUCTION);
        let vars = with(vars, "CERT_MANAGER_LOG_FORMAT", "json");
        let vars = with(vars, "CERT_MANAGER_DATA_DIR", "/var/lib/cert-manager");

        let settings = Settings::from_vars(vars).unwrap();

        assert_eq!(settings.schedule, Schedule::Every(Duration::from_secs(1800)));
        assert_eq!(settings.renew_before_days, 14);
        assert!(!settings.is_staging());
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.data_dir, PathBuf::from("/var/lib/cert-manager"));
    }

    #[test]
    fn test_missing_email() {
        let err = Settings::from_vars(without(base_vars(), "CERT_MANAGER_EMAIL")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { var: "CERT_MANAGER_EMAIL", .. }));
    }

    #[test]
    fn test_missing_domains() {
        let err = Settings::from_vars(with(base_vars(), "CERT_MANAGER_DOMAINS", " ")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { var: "CERT_MANAGER_DOMAINS", .. }));
    }

    #[test]
    fn test_duplicate_domain_rejected() {
        let vars = with(base_vars(), "CERT_MANAGER_DOMAINS", "a.example.com,A.example.com");
        let err = Settings::from_vars(vars).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_invalid_email() {
        let vars = with(base_vars(), "CERT_MANAGER_EMAIL", "not-an-email");
        let err = Settings::from_vars(vars).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_email_must_be_a_plain_account_name() {
        for email in ["../../x@example.com", "a/b@example.com", ".hidden@example.com"] {
            let vars = with(base_vars(), "CERT_MANAGER_EMAIL", email);
            assert!(matches!(
                Settings::from_vars(vars).unwrap_err(),
                ConfigError::Invalid { var: "CERT_MANAGER_EMAIL", .. }
            ));
        }
    }

    #[test]
    fn test_days_out_of_range() {
        let vars = with(base_vars(), "CERT_MANAGER_DAYS", "0");
        assert!(matches!(
            Settings::from_vars(vars).unwrap_err(),
            ConfigError::Validation(_)
        ));
    }

    #[test]
    fn test_days_not_a_number() {
        let vars = with(base_vars(), "CERT_MANAGER_DAYS", "thirty");
        assert!(matches!(
            Settings::from_vars(vars).unwrap_err(),
            ConfigError::Environment(_)
        ));
    }

    #[test]
    fn test_unsupported_dns_provider() {
        let vars = with(base_vars(), "DNS_PROVIDER", "route53");
        let err = Settings::from_vars(vars).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "DNS_PROVIDER", .. }));
    }

    #[test]
    fn test_alidns_is_rejected_with_a_hint() {
        let vars = with(base_vars(), "DNS_PROVIDER", "alidns");
        match Settings::from_vars(vars).unwrap_err() {
            ConfigError::Invalid { var, message } => {
                assert_eq!(var, "DNS_PROVIDER");
                assert!(message.contains("no longer supported"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_env_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!load_env_file(&dir.path().join(".env")).unwrap());
    }

    #[test]
    fn test_env_file_loaded_without_overriding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "CDN_CERT_MANAGER_ENV_FILE_NEW=from-file\nCDN_CERT_MANAGER_ENV_FILE_SET=from-file\n",
        )
        .unwrap();
        std::env::set_var("CDN_CERT_MANAGER_ENV_FILE_SET", "from-process");

        assert!(load_env_file(&path).unwrap());
        assert_eq!(
            std::env::var("CDN_CERT_MANAGER_ENV_FILE_NEW").unwrap(),
            "from-file"
        );
        assert_eq!(
            std::env::var("CDN_CERT_MANAGER_ENV_FILE_SET").unwrap(),
            "from-process"
        );
    }

    #[test]
    fn test_env_file_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "not a valid line\n").unwrap();

        assert!(matches!(
            load_env_file(&path).unwrap_err(),
            ConfigError::EnvFile { .. }
        ));
    }

    #[test]
    fn test_cloudflare_requires_token() {
        let vars = without(base_vars(), "CLOUDFLARE_DNS_API_TOKEN");
        let err = Settings::from_vars(vars).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { var: "CLOUDFLARE_DNS_API_TOKEN", .. }));
    }

    #[test]
    fn test_tencentcloud_falls_back_to_cdn_credentials() {
        let vars = with(base_vars(), "DNS_PROVIDER", "tencentcloud");
        let settings = Settings::from_vars(vars).unwrap();

        match settings.dns.provider {
            DnsProviderSettings::TencentCloud { secret_id, secret_key } => {
                assert_eq!(secret_id, "AKIDexample");
                assert_eq!(secret_key.expose(), "secret");
            }
            other => panic!("unexpected provider: {:?}", other),
        }
    }

    #[test]
    fn test_cron_schedule() {
        let vars = with(base_vars(), "CERT_MANAGER_INTERVAL", "0 */6 * * *");
        let settings = Settings::from_vars(vars).unwrap();
        assert_eq!(settings.schedule.to_string(), "0 */6 * * *");
    }

    #[test]
    fn test_invalid_schedule() {
        let vars = with(base_vars(), "CERT_MANAGER_INTERVAL", "*/5 * * *");
        assert!(matches!(
            Settings::from_vars(vars).unwrap_err(),
            ConfigError::Schedule(_)
        ));
    }

    #[test]
    fn test_secrets_are_redacted() {
        let settings = Settings::from_vars(base_vars()).unwrap();
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("cf-token"));
        assert!(!debug.contains("\"secret\""));
    }
}
