//! Scan job records.
//!
//! A row is written once when the provider accepts a job and is only ever
//! updated with the status the provider reports.

use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use exposure_core::{ProfileRef, RemoteJobId, ScanJobStatus, ScanReason, SubjectId};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// A provider scan job for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    /// Local row identifier
    pub id: String,
    /// Subscriber the scan was run for
    pub subject_id: SubjectId,
    /// Subscriber's profile at the provider
    pub profile_ref: ProfileRef,
    /// Provider-assigned job identifier
    pub remote_job_id: RemoteJobId,
    /// Last status the provider reported
    pub status: ScanJobStatus,
    /// Why the job was started
    pub reason: ScanReason,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the status was last written
    pub updated_at: DateTime<Utc>,
    /// When the merged result set was stored, if it has been
    pub results_recorded_at: Option<DateTime<Utc>>,
    /// When the polling process stopped without storing results
    pub abandoned_at: Option<DateTime<Utc>>,
}

impl ScanJob {
    /// Whether nothing can still be polling this job.
    ///
    /// True once the polling process marked it abandoned, or once `window`
    /// has passed since creation without results being stored (the
    /// process died mid-poll). A finished job is never abandoned.
    #[must_use]
    pub fn is_abandoned(&self, now: DateTime<Utc>, window: std::time::Duration) -> bool {
        if self.status == ScanJobStatus::Finished || self.results_recorded_at.is_some() {
            return false;
        }
        if self.abandoned_at.is_some() {
            return true;
        }
        chrono::Duration::from_std(window)
            .ok()
            .and_then(|window| self.created_at.checked_add_signed(window))
            .is_some_and(|deadline| now >= deadline)
    }
}

const SELECT_COLUMNS: &str = "SELECT id, subject_id, profile_ref, remote_job_id, status, reason,
                                     created_at, updated_at, results_recorded_at, abandoned_at
                              FROM scan_jobs";

/// Create a new scan job with `pending` status.
///
/// # Errors
/// Returns `DatabaseError::Conflict` if the subject already has an initial
/// job or the remote job id is already recorded.
pub async fn create_scan_job(
    pool: &SqlitePool,
    subject_id: &SubjectId,
    profile_ref: ProfileRef,
    remote_job_id: RemoteJobId,
    reason: ScanReason,
) -> Result<ScanJob> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let status = ScanJobStatus::Pending;

    let inserted = sqlx::query(
        "INSERT INTO scan_jobs (id, subject_id, profile_ref, remote_job_id, status, reason, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(subject_id.as_str())
    .bind(profile_ref.get())
    .bind(remote_job_id.get())
    .bind(status.as_str())
    .bind(reason.as_str())
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => {}
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
            return Err(DatabaseError::Conflict(format!(
                "scan job already exists for subject {subject_id} (remote job {remote_job_id}, reason {reason})"
            )));
        }
        Err(err) => return Err(err.into()),
    }

    Ok(ScanJob {
        id,
        subject_id: subject_id.clone(),
        profile_ref,
        remote_job_id,
        status,
        reason,
        created_at: now,
        updated_at: now,
        results_recorded_at: None,
        abandoned_at: None,
    })
}

/// Store the status the provider last reported for a job.
///
/// # Errors
/// Returns `DatabaseError::NotFoundWithMessage` if no such job exists.
pub async fn update_status(
    pool: &SqlitePool,
    remote_job_id: RemoteJobId,
    status: ScanJobStatus,
) -> Result<()> {
    let result = sqlx::query("UPDATE scan_jobs SET status = ?, updated_at = ? WHERE remote_job_id = ?")
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(remote_job_id.get())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "scan job {remote_job_id} not found"
        )));
    }
    Ok(())
}

/// Record that the process polling a job stopped without storing results.
///
/// A job whose results are already recorded is left untouched.
///
/// # Errors
/// Returns `DatabaseError::NotFoundWithMessage` if no such job exists.
pub async fn mark_abandoned(pool: &SqlitePool, remote_job_id: RemoteJobId) -> Result<()> {
    let result = sqlx::query(
        "UPDATE scan_jobs SET abandoned_at = COALESCE(abandoned_at, ?)
         WHERE remote_job_id = ? AND results_recorded_at IS NULL",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(remote_job_id.get())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 && get_by_remote_id(pool, remote_job_id).await?.is_none() {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "scan job {remote_job_id} not found"
        )));
    }
    Ok(())
}

/// Look up a job by its provider identifier.
pub async fn get_by_remote_id(
    pool: &SqlitePool,
    remote_job_id: RemoteJobId,
) -> Result<Option<ScanJob>> {
    let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE remote_job_id = ?"))
        .bind(remote_job_id.get())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(parse_scan_job).transpose()
}

/// Most recently created job for a subject.
pub async fn latest_for_subject(
    pool: &SqlitePool,
    subject_id: &SubjectId,
) -> Result<Option<ScanJob>> {
    let row = sqlx::query(&format!(
        "{SELECT_COLUMNS} WHERE subject_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1"
    ))
    .bind(subject_id.as_str())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(parse_scan_job).transpose()
}

/// Number of jobs ever created for a subject.
pub async fn count_for_subject(pool: &SqlitePool, subject_id: &SubjectId) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM scan_jobs WHERE subject_id = ?")
        .bind(subject_id.as_str())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("invalid timestamp '{value}': {e}")))
}

fn parse_scan_job(row: &SqliteRow) -> Result<ScanJob> {
    let subject_id: String = row.try_get("subject_id")?;
    let profile_ref: i64 = row.try_get("profile_ref")?;
    let status: String = row.try_get("status")?;
    let reason: String = row.try_get("reason")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let results_recorded_at: Option<String> = row.try_get("results_recorded_at")?;
    let abandoned_at: Option<String> = row.try_get("abandoned_at")?;

    Ok(ScanJob {
        id: row.try_get("id")?,
        subject_id: SubjectId::new(subject_id).map_err(|e| DatabaseError::Decode(e.to_string()))?,
        profile_ref: ProfileRef::new(profile_ref)
            .map_err(|e| DatabaseError::Decode(e.to_string()))?,
        remote_job_id: RemoteJobId::new(row.try_get("remote_job_id")?),
        status: status
            .parse()
            .map_err(|e: exposure_core::ExposureError| DatabaseError::Decode(e.to_string()))?,
        reason: reason
            .parse()
            .map_err(|e: exposure_core::ExposureError| DatabaseError::Decode(e.to_string()))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        results_recorded_at: results_recorded_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
        abandoned_at: abandoned_at.as_deref().map(parse_timestamp).transpose()?,
    })
}
