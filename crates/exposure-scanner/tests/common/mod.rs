//! In-memory provider and store used by the orchestrator tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exposure_core::{
    PollingConfig, ProfileRef, RemoteJobId, ScanJobStatus, ScanReason, ScanResultRecord,
    ScanResultStatus, SubjectId,
};
use exposure_db::{DatabaseError, ScanJob};
use exposure_provider::{ProviderError, RemoteJob, ResultPage, ScanProviderClient};
use exposure_scanner::{
    EligibilityGate, PollingOrchestrator, ScanHistory, ScanStore, Subject, SubjectDirectory,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// A provider call, in the order it was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Create(ProfileRef),
    Status(RemoteJobId),
    Page(u32),
}

/// Scripted reply to a status query.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Status(ScanJobStatus),
    Unavailable,
}

#[derive(Default)]
struct ProfileScript {
    statuses: VecDeque<Reply>,
    records: Vec<ScanResultRecord>,
    job_id: Option<RemoteJobId>,
}

/// Provider whose replies are scripted per profile.
///
/// Status replies are consumed in order; once exhausted every further
/// query answers `in_progress`.
#[derive(Default)]
pub struct FakeProvider {
    next_job_id: AtomicI64,
    scripts: Mutex<HashMap<ProfileRef, ProfileScript>>,
    calls: Mutex<Vec<Call>>,
    fail_create: bool,
    fail_page: Option<u32>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            next_job_id: AtomicI64::new(1000),
            ..Self::default()
        }
    }

    pub fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Self::new()
        }
    }

    pub fn with_fail_page(mut self, page: u32) -> Self {
        self.fail_page = Some(page);
        self
    }

    pub fn script(&self, profile: ProfileRef, statuses: Vec<Reply>, record_count: usize) {
        let mut scripts = self.scripts.lock().expect("lock");
        let script = scripts.entry(profile).or_default();
        script.statuses = statuses.into();
        script.records = (0..record_count).map(|n| record(n, "broker.example")).collect();
    }

    /// `in_progress` for `ticks - 1` queries, then `finished`.
    pub fn finish_on(&self, profile: ProfileRef, ticks: usize, record_count: usize) {
        let mut statuses = vec![Reply::Status(ScanJobStatus::InProgress); ticks - 1];
        statuses.push(Reply::Status(ScanJobStatus::Finished));
        self.script(profile, statuses, record_count);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn status_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Status(_)))
            .count()
    }

    pub fn create_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create(_)))
            .count()
    }

    pub fn page_calls(&self) -> Vec<u32> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                Call::Page(page) => Some(*page),
                _ => None,
            })
            .collect()
    }

    fn unavailable() -> ProviderError {
        ProviderError::ApiError {
            provider: "fake".to_string(),
            status: 503,
            message: "service unavailable".to_string(),
        }
    }
}

#[async_trait]
impl ScanProviderClient for FakeProvider {
    async fn create_job(&self, profile: ProfileRef) -> exposure_provider::Result<RemoteJob> {
        self.calls.lock().expect("lock").push(Call::Create(profile));
        if self.fail_create {
            return Err(Self::unavailable());
        }

        let id = RemoteJobId::new(self.next_job_id.fetch_add(1, Ordering::SeqCst));
        self.scripts
            .lock()
            .expect("lock")
            .entry(profile)
            .or_default()
            .job_id = Some(id);
        Ok(RemoteJob {
            id,
            status: ScanJobStatus::Pending,
        })
    }

    async fn job_status(
        &self,
        profile: ProfileRef,
        job: RemoteJobId,
    ) -> exposure_provider::Result<ScanJobStatus> {
        self.calls.lock().expect("lock").push(Call::Status(job));
        let reply = self
            .scripts
            .lock()
            .expect("lock")
            .get_mut(&profile)
            .and_then(|s| s.statuses.pop_front())
            .unwrap_or(Reply::Status(ScanJobStatus::InProgress));

        match reply {
            Reply::Status(status) => Ok(status),
            Reply::Unavailable => Err(Self::unavailable()),
        }
    }

    async fn fetch_result_page(
        &self,
        profile: ProfileRef,
        page: u32,
        page_size: u32,
    ) -> exposure_provider::Result<ResultPage> {
        self.calls.lock().expect("lock").push(Call::Page(page));
        if self.fail_page == Some(page) {
            return Err(Self::unavailable());
        }

        let scripts = self.scripts.lock().expect("lock");
        let script = scripts.get(&profile).expect("scripted profile");
        let job_id = script.job_id.expect("job created");
        let size = page_size as usize;
        let last_page = script.records.len().div_ceil(size).max(1);
        let start = (page as usize - 1) * size;
        let end = (start + size).min(script.records.len());

        Ok(ResultPage {
            items: script.records[start..end]
                .iter()
                .cloned()
                .map(|mut r| {
                    r.job_id = job_id;
                    r
                })
                .collect(),
            page_number: page,
            last_page_number: u32::try_from(last_page).expect("page count"),
        })
    }

    fn provider_id(&self) -> &str {
        "fake"
    }
}

/// Store keeping subjects, jobs and results in memory.
#[derive(Default)]
pub struct FakeStore {
    subjects: Mutex<HashMap<SubjectId, Subject>>,
    jobs: Mutex<Vec<ScanJob>>,
    results: Mutex<HashMap<RemoteJobId, Vec<ScanResultRecord>>>,
    record_results_calls: AtomicU32,
    transient_results_failures: AtomicU32,
    history_unavailable: bool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unavailable_history() -> Self {
        Self {
            history_unavailable: true,
            ..Self::default()
        }
    }

    /// Fail the next `n` result writes with a transient error.
    pub fn fail_results_writes(&self, n: u32) {
        self.transient_results_failures.store(n, Ordering::SeqCst);
    }

    pub fn add_subject(&self, id: &str, profile: Option<i64>) -> SubjectId {
        let subject_id = subject_id(id);
        self.subjects.lock().expect("lock").insert(
            subject_id.clone(),
            Subject {
                id: subject_id.clone(),
                email: format!("{}@example.com", id.to_lowercase()),
                profile_ref: profile.map(|p| ProfileRef::new(p).expect("valid profile")),
            },
        );
        subject_id
    }

    /// Insert a job directly, as if left behind by a run a day ago.
    pub fn seed_job(&self, subject_id: &SubjectId, remote: i64, status: ScanJobStatus) {
        self.seed_job_created(subject_id, remote, status, Utc::now() - chrono::Duration::days(1));
    }

    /// Insert an unmarked job created just now, as if another process were
    /// still polling it.
    pub fn seed_recent_job(&self, subject_id: &SubjectId, remote: i64, status: ScanJobStatus) {
        self.seed_job_created(subject_id, remote, status, Utc::now());
    }

    fn seed_job_created(
        &self,
        subject_id: &SubjectId,
        remote: i64,
        status: ScanJobStatus,
        created_at: DateTime<Utc>,
    ) {
        self.jobs.lock().expect("lock").push(ScanJob {
            id: format!("seed-{remote}"),
            subject_id: subject_id.clone(),
            profile_ref: ProfileRef::new(1).expect("valid profile"),
            remote_job_id: RemoteJobId::new(remote),
            status,
            reason: ScanReason::Initial,
            created_at,
            updated_at: created_at,
            results_recorded_at: (status == ScanJobStatus::Finished).then_some(created_at),
            abandoned_at: None,
        });
    }

    pub fn jobs(&self) -> Vec<ScanJob> {
        self.jobs.lock().expect("lock").clone()
    }

    pub fn job(&self, remote: RemoteJobId) -> ScanJob {
        self.jobs()
            .into_iter()
            .find(|j| j.remote_job_id == remote)
            .expect("job recorded")
    }

    pub fn results(&self, remote: RemoteJobId) -> Option<Vec<ScanResultRecord>> {
        self.results.lock().expect("lock").get(&remote).cloned()
    }

    pub fn record_results_calls(&self) -> u32 {
        self.record_results_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubjectDirectory for FakeStore {
    async fn resolve(&self, subject_id: &SubjectId) -> exposure_db::Result<Option<Subject>> {
        Ok(self.subjects.lock().expect("lock").get(subject_id).cloned())
    }
}

#[async_trait]
impl ScanHistory for FakeStore {
    async fn latest_job(&self, subject_id: &SubjectId) -> exposure_db::Result<Option<ScanJob>> {
        if self.history_unavailable {
            return Err(DatabaseError::Open("database is locked".to_string()));
        }
        Ok(self
            .jobs
            .lock()
            .expect("lock")
            .iter()
            .rev()
            .find(|j| &j.subject_id == subject_id)
            .cloned())
    }
}

#[async_trait]
impl ScanStore for FakeStore {
    async fn record_job(
        &self,
        subject_id: &SubjectId,
        profile: ProfileRef,
        remote_job_id: RemoteJobId,
        reason: ScanReason,
    ) -> exposure_db::Result<ScanJob> {
        let now = Utc::now();
        let job = ScanJob {
            id: format!("job-{remote_job_id}"),
            subject_id: subject_id.clone(),
            profile_ref: profile,
            remote_job_id,
            status: ScanJobStatus::Pending,
            reason,
            created_at: now,
            updated_at: now,
            results_recorded_at: None,
            abandoned_at: None,
        };
        self.jobs.lock().expect("lock").push(job.clone());
        Ok(job)
    }

    async fn update_job_status(
        &self,
        remote_job_id: RemoteJobId,
        status: ScanJobStatus,
    ) -> exposure_db::Result<()> {
        let mut jobs = self.jobs.lock().expect("lock");
        let job = jobs
            .iter_mut()
            .find(|j| j.remote_job_id == remote_job_id)
            .ok_or(DatabaseError::NotFound)?;
        job.status = status;
        Ok(())
    }

    async fn record_results(
        &self,
        remote_job_id: RemoteJobId,
        records: &[ScanResultRecord],
    ) -> exposure_db::Result<usize> {
        self.record_results_calls.fetch_add(1, Ordering::SeqCst);
        let pending_failures = self.transient_results_failures.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.transient_results_failures
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(DatabaseError::Io(std::io::Error::other("disk busy")));
        }

        let mut results = self.results.lock().expect("lock");
        if results.contains_key(&remote_job_id) {
            return Err(DatabaseError::Conflict(format!(
                "results already recorded for job {remote_job_id}"
            )));
        }
        results.insert(remote_job_id, records.to_vec());

        let mut jobs = self.jobs.lock().expect("lock");
        if let Some(job) = jobs.iter_mut().find(|j| j.remote_job_id == remote_job_id) {
            job.status = ScanJobStatus::Finished;
            job.results_recorded_at = Some(Utc::now());
        }
        Ok(records.len())
    }

    async fn mark_abandoned(&self, remote_job_id: RemoteJobId) -> exposure_db::Result<()> {
        let mut jobs = self.jobs.lock().expect("lock");
        let job = jobs
            .iter_mut()
            .find(|j| j.remote_job_id == remote_job_id)
            .ok_or(DatabaseError::NotFound)?;
        if job.results_recorded_at.is_none() {
            job.abandoned_at.get_or_insert_with(Utc::now);
        }
        Ok(())
    }
}

pub fn subject_id(id: &str) -> SubjectId {
    SubjectId::new(id).expect("valid subject id")
}

pub fn profile(id: i64) -> ProfileRef {
    ProfileRef::new(id).expect("valid profile")
}

pub fn record(n: usize, broker: &str) -> ScanResultRecord {
    ScanResultRecord {
        job_id: RemoteJobId::new(0),
        external_record_id: i64::try_from(n).expect("small id"),
        status: ScanResultStatus::New,
        manually_resolved: false,
        data_broker: broker.to_string(),
        link: format!("https://{broker}/people/{n}"),
        extracted_data: serde_json::json!({ "name": format!("Person {n}") }),
    }
}

/// One-second ticks, 15 attempts, pages of 100.
pub fn polling_config() -> PollingConfig {
    PollingConfig::default()
}

pub fn orchestrator(provider: Arc<FakeProvider>, store: Arc<FakeStore>) -> PollingOrchestrator {
    let gate = EligibilityGate::new(store.clone());
    PollingOrchestrator::new(provider, store.clone(), store, gate, polling_config())
}
