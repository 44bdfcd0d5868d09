//! Keeps Tencent Cloud CDN domains covered by ACME certificates
//!
//! For every configured domain a scheduled cycle reads the HTTPS state from
//! the CDN, decides whether to keep, issue or renew the certificate, obtains
//! it from an ACME CA through DNS-01 and uploads it back to the CDN.
//!
//! # Modules
//!
//! - [`acme`] - identities, certificate bundles, the ACME authority and DNS-01
//! - [`cdn`] - CDN HTTPS state and the Tencent Cloud adapter
//! - [`scheduler`] - lifecycle decisions and the per-domain scheduler
//! - [`app`] - wiring from [`cdn_cert_manager_config::Settings`]

pub mod acme;
pub mod app;
pub mod cdn;
pub mod logging;
pub mod scheduler;
pub mod tencentcloud;

pub use app::{App, Manager, StartupError};
pub use scheduler::{
    decide, CycleError, CycleOutcome, CycleReport, Decision, JobStatus, Orchestrator,
    OrchestratorConfig,
};
