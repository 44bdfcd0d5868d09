//! DNS-01 challenge support for ACME
//!
//! - [`DnsProvider`] - the provider selected at startup (Cloudflare or DNSPod)
//! - [`Dns01ChallengeManager`] - publishes records and waits for them
//! - [`PublishedChallenges`] - records of one order, removed even if the order is abandoned
//! - [`PropagationChecker`] - verifies propagation before validation

mod challenge;
mod propagation;
mod provider;
mod providers;

pub use challenge::{
    compute_challenge_value, Dns01ChallengeInfo, Dns01ChallengeManager, PublishedChallenges,
};
pub use propagation::{PropagationChecker, PropagationConfig};
pub use provider::{
    challenge_record_fqdn, DnsProvider, DnsProviderError, DnsResult, ACME_CHALLENGE_RECORD,
};
pub use providers::{CloudflareProvider, DnspodProvider};
