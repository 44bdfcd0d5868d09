//! Certificate lifecycle scheduler
//!
//! One task per domain runs a cycle immediately and then at every firing of
//! the shared schedule. A cycle reads the domain's TLS state from the CDN,
//! decides whether to keep, issue or renew, and deploys the result.
//!
//! Each cycle runs in its own spawned task. Errors and panics end that cycle
//! only; they are logged with the domain and the loop carries on.

mod decision;
mod job;

use std::any::Any;
use std::sync::Arc;

use cdn_cert_manager_config::{Schedule, Settings};
use chrono::{Duration, Utc};
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use decision::{decide, Decision};
pub use job::{CycleError, CycleOutcome, CycleReport, JobStatus, LastOutcome};

use crate::acme::{
    CertificateAuthority, CertificateAuthoritySession, CertificateBundle, CertificateRepository,
    IdentityRepository, SessionError,
};
use crate::cdn::{CdnControlPlane, CdnState, Expiry};
use job::DomainJob;

/// What the orchestrator manages and when
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub email: String,
    pub domains: Vec<String>,
    pub schedule: Schedule,
    /// Renew when the deployed certificate expires within this window
    pub renew_before: Duration,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            email: settings.email.clone(),
            domains: settings.domains.clone(),
            schedule: settings.schedule.clone(),
            renew_before: Duration::days(i64::from(settings.renew_before_days)),
        }
    }
}

/// Drives the certificate lifecycle of every configured domain
pub struct Orchestrator<A, C> {
    shared: Arc<Shared<A, C>>,
}

struct Shared<A, C> {
    config: OrchestratorConfig,
    authority: Arc<A>,
    cdn: CdnState<C>,
    identities: Arc<dyn IdentityRepository>,
    certificates: Arc<dyn CertificateRepository>,
    session: OnceCell<CertificateAuthoritySession<Arc<A>>>,
    jobs: Vec<Arc<DomainJob>>,
}

impl<A, C> Orchestrator<A, C>
where
    A: CertificateAuthority + 'static,
    C: CdnControlPlane + 'static,
{
    pub fn new(
        config: OrchestratorConfig,
        authority: A,
        cdn: CdnState<C>,
        identities: Arc<dyn IdentityRepository>,
        certificates: Arc<dyn CertificateRepository>,
    ) -> Self {
        let schedule = config.schedule.to_string();
        let jobs = config
            .domains
            .iter()
            .map(|domain| Arc::new(DomainJob::new(domain, &schedule)))
            .collect();

        Self {
            shared: Arc::new(Shared {
                config,
                authority: Arc::new(authority),
                cdn,
                identities,
                certificates,
                session: OnceCell::new(),
                jobs,
            }),
        }
    }

    pub fn cdn(&self) -> &CdnState<C> {
        &self.shared.cdn
    }

    /// Snapshots of every domain job, in configuration order
    pub fn jobs(&self) -> Vec<JobStatus> {
        self.shared.jobs.iter().map(|job| job.snapshot()).collect()
    }

    /// Run the scheduler until `cancel` fires
    ///
    /// Returns once every domain loop has observed the cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            domains = self.shared.jobs.len(),
            schedule = %self.shared.config.schedule,
            renew_before_days = self.shared.config.renew_before.num_days(),
            "Starting certificate lifecycle scheduler"
        );

        let mut loops = JoinSet::new();
        for job in &self.shared.jobs {
            loops.spawn(domain_loop(self.shared.clone(), job.clone(), cancel.clone()));
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Domain scheduler task ended abnormally");
            }
        }

        info!("Certificate lifecycle scheduler stopped");
    }

    /// Run one cycle for every domain concurrently
    pub async fn run_once(&self) -> Vec<CycleReport> {
        self.run_once_until(CancellationToken::new()).await
    }

    /// Like [`Self::run_once`], ending in-flight cycles when `cancel` fires
    pub async fn run_once_until(&self, cancel: CancellationToken) -> Vec<CycleReport> {
        let mut cycles = JoinSet::new();
        for (index, job) in self.shared.jobs.iter().enumerate() {
            let shared = self.shared.clone();
            let job = job.clone();
            let cancel = cancel.clone();
            cycles.spawn(async move {
                let result = shared.execute(&job, &cancel).await;
                (index, CycleReport {
                    domain: job.domain.clone(),
                    result,
                })
            });
        }

        let mut reports = Vec::with_capacity(self.shared.jobs.len());
        while let Some(joined) = cycles.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "Cycle supervisor task ended abnormally"),
            }
        }
        reports.sort_by_key(|(index, _)| *index);
        reports.into_iter().map(|(_, report)| report).collect()
    }
}

impl<A, C> std::fmt::Debug for Orchestrator<A, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("domains", &self.shared.config.domains)
            .field("schedule", &self.shared.config.schedule)
            .finish_non_exhaustive()
    }
}

async fn domain_loop<A, C>(shared: Arc<Shared<A, C>>, job: Arc<DomainJob>, cancel: CancellationToken)
where
    A: CertificateAuthority + 'static,
    C: CdnControlPlane + 'static,
{
    loop {
        let _ = shared.execute(&job, &cancel).await;
        if cancel.is_cancelled() {
            break;
        }

        let now = Utc::now();
        let delay = shared.config.schedule.delay_from(now);
        if let Ok(step) = Duration::from_std(delay) {
            job.scheduled(now + step);
        }
        debug!(domain = %job.domain, delay_secs = delay.as_secs(), "Next certificate check scheduled");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!(domain = %job.domain, "Domain scheduler stopped");
}

impl<A, C> Shared<A, C>
where
    A: CertificateAuthority + 'static,
    C: CdnControlPlane + 'static,
{
    /// Run one cycle in its own task and contain whatever it returns
    async fn execute(
        self: &Arc<Self>,
        job: &Arc<DomainJob>,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome, CycleError> {
        let handle = tokio::spawn(run_cycle(self.clone(), job.clone(), cancel.clone()));

        let result = match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let result = Err(CycleError::Panicked(panic_message(e.into_panic())));
                job.finished(&result);
                result
            }
            Err(_) => {
                let result = Err(CycleError::Cancelled);
                job.finished(&result);
                result
            }
        };

        match &result {
            Ok(outcome) => info!(domain = %job.domain, outcome = %outcome, "Certificate cycle completed"),
            Err(CycleError::Cancelled) => info!(domain = %job.domain, "Certificate cycle cancelled"),
            Err(e @ CycleError::Panicked(_)) => {
                error!(domain = %job.domain, error = %e, "Certificate cycle hit an unexpected fault")
            }
            Err(e) => error!(domain = %job.domain, error = %e, "Certificate cycle failed"),
        }

        result
    }

    async fn session(&self) -> Result<&CertificateAuthoritySession<Arc<A>>, SessionError> {
        self.session
            .get_or_try_init(|| {
                CertificateAuthoritySession::connect(
                    self.authority.clone(),
                    self.identities.clone(),
                    self.certificates.clone(),
                    &self.config.email,
                )
            })
            .await
    }

    async fn cycle(&self, job: &DomainJob) -> Result<CycleOutcome, CycleError> {
        let domain = job.domain.as_str();
        let state = self.cdn.describe(domain).await?;
        let decision = decide(&state, Utc::now(), self.config.renew_before);
        job.decided(decision);

        info!(domain = %domain, decision = %decision, "Certificate decision");

        let (bundle, fell_back) = match (decision, &state.expiry) {
            (Decision::Keep, Some(Expiry::At(expires_at))) => {
                return Ok(CycleOutcome::Kept {
                    expires_at: *expires_at,
                });
            }
            (Decision::Renew, _) => self.renew_or_issue(domain).await?,
            // Keep always carries a known expiry; anything else is an issuance
            _ => (self.session().await?.obtain(domain).await?, false),
        };

        let expires_at = self.cdn.push(domain, &bundle).await?;
        Ok(CycleOutcome::Deployed {
            decision,
            expires_at,
            fell_back,
        })
    }

    /// Renew, falling back to a single fresh issuance on any failure
    async fn renew_or_issue(&self, domain: &str) -> Result<(CertificateBundle, bool), CycleError> {
        let session = self.session().await?;
        match session.renew(domain).await {
            Ok(bundle) => Ok((bundle, false)),
            Err(e) => {
                warn!(domain = %domain, error = %e, "Renewal failed, issuing a new certificate instead");
                Ok((session.obtain(domain).await?, true))
            }
        }
    }
}

async fn run_cycle<A, C>(
    shared: Arc<Shared<A, C>>,
    job: Arc<DomainJob>,
    cancel: CancellationToken,
) -> Result<CycleOutcome, CycleError>
where
    A: CertificateAuthority + 'static,
    C: CdnControlPlane + 'static,
{
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CycleError::Cancelled),
        result = async {
            let _running = job.cycle.lock().await;
            job.started();
            info!(domain = %job.domain, "Certificate cycle started");
            shared.cycle(&job).await
        } => result,
    };

    job.finished(&result);
    result
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
