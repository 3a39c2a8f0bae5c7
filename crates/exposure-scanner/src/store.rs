//! Storage capabilities the scanner depends on.
//!
//! The orchestrator and the eligibility gate only see these traits. The
//! `SQLite` [`Database`] implements all of them; tests substitute in-memory
//! fakes.

use async_trait::async_trait;
use exposure_core::{ProfileRef, RemoteJobId, ScanJobStatus, ScanReason, ScanResultRecord, SubjectId};
use exposure_db::{feature_flags, scan_jobs, scan_results, subscribers, Database, Result, ScanJob};
use serde::{Deserialize, Serialize};

/// A subscriber as seen by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Subject identifier
    pub id: SubjectId,
    /// Email, used for feature flag allow lists
    pub email: String,
    /// Provider-side profile, if one has been created
    pub profile_ref: Option<ProfileRef>,
}

impl From<subscribers::Subscriber> for Subject {
    fn from(subscriber: subscribers::Subscriber) -> Self {
        Self {
            id: subscriber.id,
            email: subscriber.email,
            profile_ref: subscriber.profile_ref,
        }
    }
}

/// Resolves subject identifiers to subscribers.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    /// Look up a subject. `None` when unknown.
    async fn resolve(&self, subject_id: &SubjectId) -> Result<Option<Subject>>;
}

/// Read access to a subject's scan job history.
#[async_trait]
pub trait ScanHistory: Send + Sync {
    /// Most recently created job for the subject.
    async fn latest_job(&self, subject_id: &SubjectId) -> Result<Option<ScanJob>>;

    /// Whether the subject has ever had a scan job.
    async fn has_scan_job(&self, subject_id: &SubjectId) -> Result<bool> {
        Ok(self.latest_job(subject_id).await?.is_some())
    }
}

/// Feature flag evaluation.
#[async_trait]
pub trait FlagSource: Send + Sync {
    /// Whether `flag` is on, optionally for a specific user.
    async fn is_enabled(&self, flag: &str, user_email: Option<&str>) -> Result<bool>;
}

/// Write side of scan persistence.
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Record a freshly created provider job as `pending`.
    async fn record_job(
        &self,
        subject_id: &SubjectId,
        profile: ProfileRef,
        remote_job_id: RemoteJobId,
        reason: ScanReason,
    ) -> Result<ScanJob>;

    /// Update the status of a non-terminal job.
    async fn update_job_status(&self, remote_job_id: RemoteJobId, status: ScanJobStatus) -> Result<()>;

    /// Store the merged result set and mark the job `finished`, atomically.
    ///
    /// A second call for the same job fails with a conflict.
    async fn record_results(
        &self,
        remote_job_id: RemoteJobId,
        records: &[ScanResultRecord],
    ) -> Result<usize>;

    /// Note that polling stopped without results. The status is kept.
    async fn mark_abandoned(&self, remote_job_id: RemoteJobId) -> Result<()>;
}

#[async_trait]
impl SubjectDirectory for Database {
    async fn resolve(&self, subject_id: &SubjectId) -> Result<Option<Subject>> {
        Ok(subscribers::get_subscriber(self.pool(), subject_id)
            .await?
            .map(Subject::from))
    }
}

#[async_trait]
impl ScanHistory for Database {
    async fn latest_job(&self, subject_id: &SubjectId) -> Result<Option<ScanJob>> {
        scan_jobs::latest_for_subject(self.pool(), subject_id).await
    }

    async fn has_scan_job(&self, subject_id: &SubjectId) -> Result<bool> {
        Ok(scan_jobs::count_for_subject(self.pool(), subject_id).await? > 0)
    }
}

#[async_trait]
impl FlagSource for Database {
    async fn is_enabled(&self, flag: &str, user_email: Option<&str>) -> Result<bool> {
        feature_flags::is_flag_enabled(self.pool(), flag, user_email).await
    }
}

#[async_trait]
impl ScanStore for Database {
    async fn record_job(
        &self,
        subject_id: &SubjectId,
        profile: ProfileRef,
        remote_job_id: RemoteJobId,
        reason: ScanReason,
    ) -> Result<ScanJob> {
        scan_jobs::create_scan_job(self.pool(), subject_id, profile, remote_job_id, reason).await
    }

    async fn update_job_status(&self, remote_job_id: RemoteJobId, status: ScanJobStatus) -> Result<()> {
        scan_jobs::update_status(self.pool(), remote_job_id, status).await
    }

    async fn record_results(
        &self,
        remote_job_id: RemoteJobId,
        records: &[ScanResultRecord],
    ) -> Result<usize> {
        scan_results::record_results(self.pool(), remote_job_id, records).await
    }

    async fn mark_abandoned(&self, remote_job_id: RemoteJobId) -> Result<()> {
        scan_jobs::mark_abandoned(self.pool(), remote_job_id).await
    }
}
