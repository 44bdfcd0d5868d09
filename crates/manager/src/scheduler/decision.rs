//! Expiry-based lifecycle decision

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::cdn::{Expiry, TlsState};

/// What a cycle does for one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Certificate is good for longer than the threshold
    Keep,
    /// No usable certificate on the CDN
    Issue,
    /// Certificate expires within the threshold (or already has)
    Renew,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Keep => write!(f, "keep"),
            Decision::Issue => write!(f, "issue"),
            Decision::Renew => write!(f, "renew"),
        }
    }
}

pub fn decide(state: &TlsState, now: DateTime<Utc>, threshold: Duration) -> Decision {
    if !state.enabled {
        return Decision::Issue;
    }
    match &state.expiry {
        Some(Expiry::At(expiry)) if *expiry - now >= threshold => Decision::Keep,
        Some(Expiry::At(_)) => Decision::Renew,
        Some(Expiry::Unparseable(_)) | None => Decision::Issue,
    }
}
