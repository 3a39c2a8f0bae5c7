//! Polling orchestrator for provider scan jobs.
//!
//! A scan runs in two phases. Starting a scan checks the subject's
//! preconditions, creates the provider job and records it as `pending`;
//! any failure there is returned to the caller. The polling phase then
//! runs in the background: one status query per tick, up to
//! `max_attempts` ticks. On `finished` every result page is fetched and the
//! merged set is persisted together with the job's final status.

use crate::eligibility::EligibilityGate;
use crate::error::{Result, ScanError};
use crate::paginator::ResultPaginator;
use crate::store::{FlagSource, ScanHistory, ScanStore, Subject, SubjectDirectory};
use chrono::Utc;
use exposure_core::{
    AppConfig, PollingConfig, ProfileRef, RemoteJobId, ScanJobStatus, ScanReason, ScanResultRecord,
    SubjectId,
};
use exposure_db::{Database, ScanJob};
use exposure_provider::ScanProviderClient;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Counts status queries for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollAttempt {
    job_id: RemoteJobId,
    attempt_count: u32,
    max_attempts: u32,
}

impl PollAttempt {
    /// Start counting for `job_id`.
    #[must_use]
    pub fn new(job_id: RemoteJobId, max_attempts: u32) -> Self {
        Self {
            job_id,
            attempt_count: 0,
            max_attempts,
        }
    }

    /// Record one query and return the new count.
    pub fn advance(&mut self) -> u32 {
        debug_assert!(self.attempt_count < self.max_attempts);
        self.attempt_count = (self.attempt_count + 1).min(self.max_attempts);
        self.attempt_count
    }

    /// Whether the attempt budget is spent.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// Job being polled.
    #[must_use]
    pub fn job_id(&self) -> RemoteJobId {
        self.job_id
    }

    /// Queries made so far.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Query budget.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Observable progress of a running scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScanState {
    /// The provider job exists; polling has not begun
    Created {
        /// Provider job
        remote_job_id: RemoteJobId,
    },
    /// Waiting for the provider
    Polling {
        /// Status queries made so far
        attempt: u32,
        /// Query budget
        max_attempts: u32,
    },
    /// Results were fetched and stored
    Finished {
        /// Number of stored records
        result_count: usize,
    },
    /// The provider never reported `finished` within budget
    GaveUp {
        /// Status queries made
        attempts: u32,
    },
    /// Polling stopped on request
    Cancelled {
        /// Status queries made before stopping
        attempts: u32,
    },
    /// Results could not be fetched or stored
    Failed {
        /// Error description
        message: String,
    },
}

impl ScanState {
    /// Progress as a percentage, if meaningful.
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        match self {
            Self::Created { .. } => Some(0),
            Self::Polling {
                attempt,
                max_attempts,
            } => {
                if *max_attempts == 0 {
                    return Some(0);
                }
                let pct = u64::from(*attempt) * 100 / u64::from(*max_attempts);
                Some(u8::try_from(pct.min(99)).unwrap_or(99))
            }
            Self::Finished { .. } => Some(100),
            Self::GaveUp { .. } | Self::Cancelled { .. } | Self::Failed { .. } => None,
        }
    }

    /// Whether the scan task has stopped.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            Self::Finished { .. } | Self::GaveUp { .. } | Self::Cancelled { .. } | Self::Failed { .. }
        )
    }
}

/// How the polling phase ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// Results were stored
    Finished {
        /// Number of stored records
        result_count: usize,
    },
    /// The attempt budget ran out; nothing was stored
    GaveUp {
        /// Status queries made
        attempts: u32,
    },
    /// Cancelled at a tick boundary; nothing was stored
    Cancelled {
        /// Status queries made
        attempts: u32,
    },
}

impl From<ScanOutcome> for ScanState {
    fn from(outcome: ScanOutcome) -> Self {
        match outcome {
            ScanOutcome::Finished { result_count } => Self::Finished { result_count },
            ScanOutcome::GaveUp { attempts } => Self::GaveUp { attempts },
            ScanOutcome::Cancelled { attempts } => Self::Cancelled { attempts },
        }
    }
}

/// Result of a scan driven to completion in the caller's task.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    /// The job as recorded at creation
    pub job: ScanJob,
    /// How polling ended
    pub outcome: ScanOutcome,
}

/// Handle to a scan polling in the background.
#[derive(Debug)]
pub struct ScanHandle {
    job: ScanJob,
    state: watch::Receiver<ScanState>,
    cancel: CancellationToken,
    task: JoinHandle<Result<ScanOutcome>>,
}

impl ScanHandle {
    /// The job as recorded at creation.
    #[must_use]
    pub fn job(&self) -> &ScanJob {
        &self.job
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ScanState {
        self.state.borrow().clone()
    }

    /// A receiver that is notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.state.clone()
    }

    /// Ask the scan to stop at the next tick boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this scan, for wiring to other shutdown signals.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the background task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the background task.
    pub async fn wait(self) -> Result<ScanOutcome> {
        self.task
            .await
            .map_err(|e| ScanError::Task(e.to_string()))?
    }
}

type ActiveSubjects = Arc<Mutex<HashSet<SubjectId>>>;

/// Marks a subject as having a scan in flight until dropped.
struct ActiveClaim {
    active: ActiveSubjects,
    subject_id: SubjectId,
}

impl Drop for ActiveClaim {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.subject_id);
    }
}

/// A job that passed every precondition and is ready to poll.
struct PreparedScan {
    claim: ActiveClaim,
    profile: ProfileRef,
    job: ScanJob,
}

/// Creates provider jobs and polls them to completion.
///
/// Cloning is cheap; clones share the provider, storage and the set of
/// subjects with a scan in flight.
#[derive(Clone)]
pub struct PollingOrchestrator {
    provider: Arc<dyn ScanProviderClient>,
    store: Arc<dyn ScanStore>,
    directory: Arc<dyn SubjectDirectory>,
    gate: EligibilityGate,
    config: PollingConfig,
    active: ActiveSubjects,
}

impl fmt::Debug for PollingOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingOrchestrator")
            .field("provider", &self.provider.provider_id())
            .field("gate", &self.gate)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PollingOrchestrator {
    /// Create an orchestrator from its parts.
    #[must_use]
    pub fn new(
        provider: Arc<dyn ScanProviderClient>,
        store: Arc<dyn ScanStore>,
        directory: Arc<dyn SubjectDirectory>,
        gate: EligibilityGate,
        config: PollingConfig,
    ) -> Self {
        Self {
            provider,
            store,
            directory,
            gate,
            config,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Create an orchestrator backed entirely by `db`.
    ///
    /// The free-scan flag is enforced only when the configuration asks for it.
    #[must_use]
    pub fn with_database(
        provider: Arc<dyn ScanProviderClient>,
        db: Arc<Database>,
        config: &AppConfig,
    ) -> Self {
        let history: Arc<dyn ScanHistory> = db.clone();
        let mut gate = EligibilityGate::new(history);
        if config.eligibility.enforce_flag {
            let flags: Arc<dyn FlagSource> = db.clone();
            gate = gate.with_feature_flag(flags, config.eligibility.free_scan_flag.clone());
        }
        Self::new(provider, db.clone(), db, gate, config.polling.clone())
    }

    /// Polling configuration in effect.
    #[must_use]
    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    /// Whether a scan is in flight for the subject.
    #[must_use]
    pub fn is_active(&self, subject_id: &SubjectId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(subject_id)
    }

    /// Start the free initial scan for an eligible subject.
    ///
    /// Returns once the provider job is created and recorded; polling
    /// continues in a background task.
    pub async fn start_scan(&self, subject_id: &SubjectId) -> Result<ScanHandle> {
        let prepared = self.prepare(subject_id, ScanReason::Initial).await?;
        Ok(self.spawn(prepared))
    }

    /// Start a new job for a subject whose latest job was abandoned.
    ///
    /// Allowed only when the latest job never reached `finished` and no
    /// scan is currently running for the subject.
    pub async fn retrigger(&self, subject_id: &SubjectId) -> Result<ScanHandle> {
        let prepared = self.prepare(subject_id, ScanReason::Manual).await?;
        Ok(self.spawn(prepared))
    }

    /// Run the free initial scan in the caller's task.
    pub async fn run_scan(
        &self,
        subject_id: &SubjectId,
        cancel: CancellationToken,
    ) -> Result<ScanReport> {
        let prepared = self.prepare(subject_id, ScanReason::Initial).await?;
        let (state_tx, _state_rx) = watch::channel(ScanState::Created {
            remote_job_id: prepared.job.remote_job_id,
        });

        let outcome = self
            .execute(&prepared.job, prepared.profile, &cancel, &state_tx)
            .await?;
        drop(prepared.claim);

        Ok(ScanReport {
            job: prepared.job,
            outcome,
        })
    }

    fn claim(&self, subject_id: &SubjectId) -> Result<ActiveClaim> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(subject_id.clone()) {
            return Err(ScanError::AlreadyRunning {
                subject_id: subject_id.clone(),
            });
        }
        Ok(ActiveClaim {
            active: self.active.clone(),
            subject_id: subject_id.clone(),
        })
    }

    async fn prepare(&self, subject_id: &SubjectId, reason: ScanReason) -> Result<PreparedScan> {
        let claim = self.claim(subject_id)?;

        let subject: Subject =
            self.directory
                .resolve(subject_id)
                .await?
                .ok_or_else(|| ScanError::MissingSubject {
                    subject_id: subject_id.clone(),
                })?;
        let profile = subject.profile_ref.ok_or_else(|| ScanError::MissingProfile {
            subject_id: subject_id.clone(),
        })?;

        match reason {
            ScanReason::Initial => {
                if !self.gate.is_eligible(&subject).await {
                    tracing::info!("Subject {} is not eligible for a free scan", subject_id);
                    return Err(ScanError::IneligibleSubject {
                        subject_id: subject_id.clone(),
                    });
                }
            }
            ScanReason::Manual => {
                let latest = self.gate.history().latest_job(subject_id).await?;
                match latest {
                    Some(job) if job.is_abandoned(Utc::now(), self.config.abandon_after()) => {
                        tracing::info!(
                            "Re-triggering scan for {} after abandoned job {}",
                            subject_id,
                            job.remote_job_id
                        );
                    }
                    latest => {
                        if let Some(job) = latest.filter(|j| j.status != ScanJobStatus::Finished) {
                            tracing::info!(
                                subject = %subject_id,
                                remote_job_id = %job.remote_job_id,
                                "Latest job may still be polled elsewhere; not re-triggering"
                            );
                        }
                        return Err(ScanError::NotRetriggerable {
                            subject_id: subject_id.clone(),
                        });
                    }
                }
            }
        }

        let remote = self.provider.create_job(profile).await.map_err(|e| {
            tracing::error!(
                "Provider {} failed to create a job for {}: {}",
                self.provider.provider_id(),
                subject_id,
                e
            );
            e
        })?;
        tracing::info!(
            subject = %subject_id,
            remote_job_id = %remote.id,
            profile = %profile,
            reason = %reason,
            "Created provider scan job"
        );

        let job = self
            .store
            .record_job(subject_id, profile, remote.id, reason)
            .await
            .map_err(|source| {
                tracing::error!(
                    "Provider job {} was created but could not be recorded: {}",
                    remote.id,
                    source
                );
                ScanError::Persistence {
                    remote_job_id: remote.id,
                    source,
                }
            })?;

        Ok(PreparedScan {
            claim,
            profile,
            job,
        })
    }

    fn spawn(&self, prepared: PreparedScan) -> ScanHandle {
        let PreparedScan {
            claim,
            profile,
            job,
        } = prepared;
        let (state_tx, state_rx) = watch::channel(ScanState::Created {
            remote_job_id: job.remote_job_id,
        });
        let cancel = CancellationToken::new();

        let orchestrator = self.clone();
        let task_job = job.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let _claim = claim;
            orchestrator
                .execute(&task_job, profile, &task_cancel, &state_tx)
                .await
        });

        ScanHandle {
            job,
            state: state_rx,
            cancel,
            task,
        }
    }

    async fn execute(
        &self,
        job: &ScanJob,
        profile: ProfileRef,
        cancel: &CancellationToken,
        state_tx: &watch::Sender<ScanState>,
    ) -> Result<ScanOutcome> {
        let result = self.poll(job, profile, cancel, state_tx).await;
        match &result {
            Ok(outcome) => {
                if !matches!(outcome, ScanOutcome::Finished { .. }) {
                    self.mark_abandoned(job).await;
                }
                state_tx.send_replace(ScanState::from(*outcome));
            }
            Err(e) => {
                tracing::error!("Scan job {} failed: {}", job.remote_job_id, e);
                self.mark_abandoned(job).await;
                state_tx.send_replace(ScanState::Failed {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    /// Record that nothing polls the job any more.
    async fn mark_abandoned(&self, job: &ScanJob) {
        if let Err(e) = self.store.mark_abandoned(job.remote_job_id).await {
            tracing::warn!(
                remote_job_id = %job.remote_job_id,
                "Failed to mark job abandoned: {}",
                e
            );
        }
    }

    async fn poll(
        &self,
        job: &ScanJob,
        profile: ProfileRef,
        cancel: &CancellationToken,
        state_tx: &watch::Sender<ScanState>,
    ) -> Result<ScanOutcome> {
        let mut attempt = PollAttempt::new(job.remote_job_id, self.config.max_attempts);
        let mut last_status = job.status;

        let tick = self.config.tick_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        state_tx.send_replace(ScanState::Polling {
            attempt: 0,
            max_attempts: attempt.max_attempts(),
        });

        while !attempt.is_exhausted() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!(
                        remote_job_id = %job.remote_job_id,
                        attempt = attempt.attempt_count(),
                        "Scan cancelled"
                    );
                    return Ok(ScanOutcome::Cancelled {
                        attempts: attempt.attempt_count(),
                    });
                }
                _ = ticker.tick() => {}
            }

            let n = attempt.advance();
            match self.provider.job_status(profile, job.remote_job_id).await {
                Ok(ScanJobStatus::Finished) => {
                    tracing::info!(
                        remote_job_id = %job.remote_job_id,
                        attempt = n,
                        "Provider reports scan finished"
                    );
                    return self.collect_results(job, profile).await;
                }
                Ok(status) => {
                    tracing::debug!(
                        remote_job_id = %job.remote_job_id,
                        attempt = n,
                        max_attempts = attempt.max_attempts(),
                        status = %status,
                        "Polled scan status"
                    );
                    if status != last_status {
                        match self.store.update_job_status(job.remote_job_id, status).await {
                            Ok(()) => last_status = status,
                            Err(e) => tracing::warn!(
                                "Failed to record status {} for job {}: {}",
                                status,
                                job.remote_job_id,
                                e
                            ),
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        remote_job_id = %job.remote_job_id,
                        attempt = n,
                        max_attempts = attempt.max_attempts(),
                        "Status query failed, retrying next tick: {}",
                        e
                    );
                }
            }

            state_tx.send_replace(ScanState::Polling {
                attempt: n,
                max_attempts: attempt.max_attempts(),
            });
        }

        tracing::warn!(
            subject = %job.subject_id,
            remote_job_id = %job.remote_job_id,
            attempt = attempt.attempt_count(),
            last_status = %last_status,
            "Giving up on scan; job left unfinished"
        );
        Ok(ScanOutcome::GaveUp {
            attempts: attempt.attempt_count(),
        })
    }

    async fn collect_results(&self, job: &ScanJob, profile: ProfileRef) -> Result<ScanOutcome> {
        let records = ResultPaginator::new(self.provider.as_ref(), self.config.page_size)
            .fetch_all(profile)
            .await?;
        let result_count = self.persist_results(job.remote_job_id, &records).await?;

        tracing::info!(
            subject = %job.subject_id,
            remote_job_id = %job.remote_job_id,
            result_count,
            "Scan results stored"
        );
        Ok(ScanOutcome::Finished { result_count })
    }

    /// Write the merged result set, retrying transient storage failures.
    async fn persist_results(
        &self,
        remote_job_id: RemoteJobId,
        records: &[ScanResultRecord],
    ) -> Result<usize> {
        let max_tries = self.config.persist_retries.saturating_add(1);
        let mut tries: u32 = 0;

        loop {
            tries = tries.saturating_add(1);
            match self.store.record_results(remote_job_id, records).await {
                Ok(count) => return Ok(count),
                Err(e) if e.is_transient() && tries < max_tries => {
                    let delay = self.config.persist_retry_delay().saturating_mul(tries);
                    tracing::warn!(
                        "Storing results for job {} failed (try {}/{}), retrying in {:?}: {}",
                        remote_job_id,
                        tries,
                        max_tries,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(source) => {
                    tracing::error!(
                        remote_job_id = %remote_job_id,
                        records = records.len(),
                        "Failed to store fetched scan results, results are lost: {}",
                        source
                    );
                    return Err(ScanError::Persistence {
                        remote_job_id,
                        source,
                    });
                }
            }
        }
    }
}
