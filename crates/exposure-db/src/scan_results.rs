//! Merged scan results.
//!
//! The full result set of a job is written in one transaction that also
//! marks the job `finished`. A second write for the same job is rejected.

use crate::error::{DatabaseError, Result};
use crate::scan_jobs::{self, ScanJob};
use chrono::Utc;
use exposure_core::{RemoteJobId, ScanJobStatus, ScanResultRecord, ScanResultStatus, SubjectId};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Latest scan of a subject together with its stored results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatestScanData {
    /// Most recent job, if the subject was ever scanned
    pub scan: Option<ScanJob>,
    /// Results stored for that job (empty until it finished)
    pub results: Vec<ScanResultRecord>,
}

impl LatestScanData {
    /// Results that still need the subscriber's attention.
    #[must_use]
    pub fn unresolved_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_unresolved()).count()
    }
}

/// Store the merged result set of a finished job.
///
/// Inserts every record, marks the job `finished` and stamps
/// `results_recorded_at`, all in one transaction.
///
/// # Errors
/// - `DatabaseError::NotFoundWithMessage` if the job was never recorded
/// - `DatabaseError::Conflict` if results were already recorded for the job
pub async fn record_results(
    pool: &SqlitePool,
    remote_job_id: RemoteJobId,
    records: &[ScanResultRecord],
) -> Result<usize> {
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;

    let claimed = sqlx::query(
        "UPDATE scan_jobs SET status = ?, updated_at = ?, results_recorded_at = ?
         WHERE remote_job_id = ? AND results_recorded_at IS NULL",
    )
    .bind(ScanJobStatus::Finished.as_str())
    .bind(&now)
    .bind(&now)
    .bind(remote_job_id.get())
    .execute(&mut *tx)
    .await?;

    if claimed.rows_affected() == 0 {
        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM scan_jobs WHERE remote_job_id = ?",
        )
        .bind(remote_job_id.get())
        .fetch_one(&mut *tx)
        .await?
            > 0;
        tx.rollback().await?;

        return Err(if exists {
            DatabaseError::Conflict(format!(
                "results already recorded for scan job {remote_job_id}"
            ))
        } else {
            DatabaseError::NotFoundWithMessage(format!("scan job {remote_job_id} not found"))
        });
    }

    for record in records {
        let extracted = serde_json::to_string(&record.extracted_data)?;
        sqlx::query(
            "INSERT INTO scan_results (remote_job_id, external_record_id, status, manually_resolved,
                                       data_broker, link, extracted_data, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(remote_job_id.get())
        .bind(record.external_record_id)
        .bind(record.status.as_str())
        .bind(record.manually_resolved)
        .bind(&record.data_broker)
        .bind(&record.link)
        .bind(&extracted)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::debug!(
        remote_job_id = %remote_job_id,
        count = records.len(),
        "Stored scan results"
    );
    Ok(records.len())
}

/// Results stored for a job, in the order they were written.
pub async fn list_for_job(
    pool: &SqlitePool,
    remote_job_id: RemoteJobId,
) -> Result<Vec<ScanResultRecord>> {
    let rows = sqlx::query(
        "SELECT remote_job_id, external_record_id, status, manually_resolved,
                data_broker, link, extracted_data
         FROM scan_results
         WHERE remote_job_id = ?
         ORDER BY id ASC",
    )
    .bind(remote_job_id.get())
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_result).collect()
}

/// Flip the `manually_resolved` flag on a stored record.
///
/// # Errors
/// Returns `DatabaseError::NotFoundWithMessage` if no such record exists.
pub async fn set_manually_resolved(
    pool: &SqlitePool,
    remote_job_id: RemoteJobId,
    external_record_id: i64,
    resolved: bool,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE scan_results SET manually_resolved = ?
         WHERE remote_job_id = ? AND external_record_id = ?",
    )
    .bind(resolved)
    .bind(remote_job_id.get())
    .bind(external_record_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "scan result {external_record_id} of job {remote_job_id} not found"
        )));
    }
    Ok(())
}

/// Latest job of a subject and its stored results.
pub async fn latest_scan_data(pool: &SqlitePool, subject_id: &SubjectId) -> Result<LatestScanData> {
    let Some(scan) = scan_jobs::latest_for_subject(pool, subject_id).await? else {
        return Ok(LatestScanData::default());
    };
    let results = list_for_job(pool, scan.remote_job_id).await?;
    Ok(LatestScanData {
        scan: Some(scan),
        results,
    })
}

fn parse_result(row: &SqliteRow) -> Result<ScanResultRecord> {
    let status: String = row.try_get("status")?;
    let extracted: String = row.try_get("extracted_data")?;

    Ok(ScanResultRecord {
        job_id: RemoteJobId::new(row.try_get("remote_job_id")?),
        external_record_id: row.try_get("external_record_id")?,
        status: status
            .parse::<ScanResultStatus>()
            .map_err(|e| DatabaseError::Decode(e.to_string()))?,
        manually_resolved: row.try_get("manually_resolved")?,
        data_broker: row.try_get("data_broker")?,
        link: row.try_get("link")?,
        extracted_data: serde_json::from_str(&extracted)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use exposure_core::{ProfileRef, ScanReason};

    async fn setup_with_job(remote: i64) -> Database {
        let db = Database::new(":memory:")
            .await
            .expect("create test database");
        db.run_migrations().await.expect("run migrations");
        scan_jobs::create_scan_job(
            db.pool(),
            &SubjectId::new("S1").expect("valid subject"),
            ProfileRef::new(5).expect("valid profile"),
            RemoteJobId::new(remote),
            ScanReason::Initial,
        )
        .await
        .expect("create scan job");
        db
    }

    fn records(job: i64, count: i64) -> Vec<ScanResultRecord> {
        (1..=count)
            .map(|i| ScanResultRecord {
                job_id: RemoteJobId::new(job),
                external_record_id: i,
                status: ScanResultStatus::New,
                manually_resolved: false,
                data_broker: format!("broker-{i}.example"),
                link: format!("https://broker-{i}.example/listing"),
                extracted_data: serde_json::json!({ "age": 30 + i }),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_record_results_marks_job_finished() {
        let db = setup_with_job(1).await;

        let stored = record_results(db.pool(), RemoteJobId::new(1), &records(1, 3))
            .await
            .expect("record results");
        assert_eq!(stored, 3);

        let job = scan_jobs::get_by_remote_id(db.pool(), RemoteJobId::new(1))
            .await
            .expect("query job")
            .expect("job exists");
        assert_eq!(job.status, ScanJobStatus::Finished);
        assert!(job.results_recorded_at.is_some());

        let listed = list_for_job(db.pool(), RemoteJobId::new(1))
            .await
            .expect("list results");
        assert_eq!(listed, records(1, 3));
    }

    #[tokio::test]
    async fn test_second_write_is_rejected() {
        let db = setup_with_job(2).await;

        record_results(db.pool(), RemoteJobId::new(2), &records(2, 2))
            .await
            .expect("first write");
        let err = record_results(db.pool(), RemoteJobId::new(2), &records(2, 1))
            .await
            .expect_err("second write must fail");
        assert!(matches!(err, DatabaseError::Conflict(_)));

        let listed = list_for_job(db.pool(), RemoteJobId::new(2))
            .await
            .expect("list results");
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_record_results_unknown_job() {
        let db = setup_with_job(3).await;
        let err = record_results(db.pool(), RemoteJobId::new(99), &records(99, 1))
            .await
            .expect_err("unknown job");
        assert!(matches!(err, DatabaseError::NotFoundWithMessage(_)));
    }

    #[tokio::test]
    async fn test_empty_result_set_still_finishes_job() {
        let db = setup_with_job(4).await;
        record_results(db.pool(), RemoteJobId::new(4), &[])
            .await
            .expect("record empty results");

        let data = latest_scan_data(db.pool(), &SubjectId::new("S1").expect("valid subject"))
            .await
            .expect("latest data");
        let scan = data.scan.expect("scan present");
        assert_eq!(scan.status, ScanJobStatus::Finished);
        assert!(data.results.is_empty());
    }

    #[tokio::test]
    async fn test_set_manually_resolved() {
        let db = setup_with_job(5).await;
        record_results(db.pool(), RemoteJobId::new(5), &records(5, 2))
            .await
            .expect("record results");

        set_manually_resolved(db.pool(), RemoteJobId::new(5), 2, true)
            .await
            .expect("resolve record");

        let data = latest_scan_data(db.pool(), &SubjectId::new("S1").expect("valid subject"))
            .await
            .expect("latest data");
        assert_eq!(data.unresolved_count(), 1);
        assert!(data.results[1].manually_resolved);

        let err = set_manually_resolved(db.pool(), RemoteJobId::new(5), 77, true)
            .await
            .expect_err("unknown record");
        assert!(matches!(err, DatabaseError::NotFoundWithMessage(_)));
    }

    #[tokio::test]
    async fn test_latest_scan_data_without_scan() {
        let db = setup_with_job(6).await;
        let data = latest_scan_data(db.pool(), &SubjectId::new("nobody").expect("valid subject"))
            .await
            .expect("latest data");
        assert!(data.scan.is_none());
        assert!(data.results.is_empty());
    }
}
