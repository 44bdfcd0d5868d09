//! Per-domain job state and cycle results

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;

use super::decision::Decision;
use crate::acme::SessionError;
use crate::cdn::CdnError;

/// Why a cycle ended without deploying or keeping a certificate
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Cdn(#[from] CdnError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Cycle cancelled by shutdown")]
    Cancelled,

    /// The cycle task panicked
    #[error("Cycle aborted unexpectedly: {0}")]
    Panicked(String),
}

/// Result of a successful cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The deployed certificate is good for longer than the threshold
    Kept { expires_at: DateTime<Utc> },
    /// A new certificate was deployed
    Deployed {
        decision: Decision,
        expires_at: DateTime<Utc>,
        /// Renewal failed and a fresh issuance was used instead
        fell_back: bool,
    },
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Kept { expires_at } => write!(f, "kept (expires {})", expires_at),
            CycleOutcome::Deployed {
                decision,
                expires_at,
                fell_back: false,
            } => write!(f, "{} (expires {})", decision, expires_at),
            CycleOutcome::Deployed { expires_at, .. } => {
                write!(f, "issue after failed renewal (expires {})", expires_at)
            }
        }
    }
}

/// Outcome of one domain's cycle, as returned by a one-shot run
#[derive(Debug)]
pub struct CycleReport {
    pub domain: String,
    pub result: Result<CycleOutcome, CycleError>,
}

/// Last recorded result of a domain's cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastOutcome {
    Succeeded(CycleOutcome),
    Failed(String),
    Cancelled,
    Panicked(String),
}

/// Snapshot of one domain's job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub domain: String,
    pub schedule: String,
    pub running: bool,
    pub last_decision: Option<Decision>,
    pub last_outcome: Option<LastOutcome>,
    pub last_started: Option<DateTime<Utc>>,
    pub last_finished: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

/// A monitored domain
pub(crate) struct DomainJob {
    pub(crate) domain: String,
    /// Held for the duration of a cycle so cycles of one domain never overlap
    pub(crate) cycle: tokio::sync::Mutex<()>,
    status: Mutex<JobStatus>,
}

impl DomainJob {
    pub(crate) fn new(domain: &str, schedule: &str) -> Self {
        Self {
            domain: domain.to_string(),
            cycle: tokio::sync::Mutex::new(()),
            status: Mutex::new(JobStatus {
                domain: domain.to_string(),
                schedule: schedule.to_string(),
                running: false,
                last_decision: None,
                last_outcome: None,
                last_started: None,
                last_finished: None,
                next_run: None,
            }),
        }
    }

    pub(crate) fn snapshot(&self) -> JobStatus {
        self.status.lock().clone()
    }

    pub(crate) fn started(&self) {
        let mut status = self.status.lock();
        status.running = true;
        status.last_started = Some(Utc::now());
        status.next_run = None;
    }

    pub(crate) fn decided(&self, decision: Decision) {
        self.status.lock().last_decision = Some(decision);
    }

    pub(crate) fn finished(&self, result: &Result<CycleOutcome, CycleError>) {
        let outcome = match result {
            Ok(outcome) => LastOutcome::Succeeded(*outcome),
            Err(CycleError::Cancelled) => LastOutcome::Cancelled,
            Err(CycleError::Panicked(message)) => LastOutcome::Panicked(message.clone()),
            Err(e) => LastOutcome::Failed(e.to_string()),
        };

        let mut status = self.status.lock();
        status.running = false;
        status.last_finished = Some(Utc::now());
        status.last_outcome = Some(outcome);
    }

    pub(crate) fn scheduled(&self, next_run: DateTime<Utc>) {
        self.status.lock().next_run = Some(next_run);
    }
}

impl fmt::Debug for DomainJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainJob")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}
