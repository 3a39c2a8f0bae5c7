//! Scan commands: start, status, cancel, re-trigger and results.

use crate::error::CommandError;
use crate::state::AppState;
use chrono::Utc;
use exposure_core::{RemoteJobId, ScanJobStatus, ScanResultRecord, SubjectId};
use exposure_db::{scan_jobs, scan_results, ScanJob};
use exposure_scanner::{CancellationToken, ScanOutcome, ScanState};
use serde::Serialize;
use tracing::info;

/// A scan job as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanJobResponse {
    pub subject_id: String,
    pub remote_job_id: i64,
    pub status: String,
    pub reason: String,
    pub created_at: String,
    pub results_recorded_at: Option<String>,
    pub abandoned_at: Option<String>,
}

impl From<&ScanJob> for ScanJobResponse {
    fn from(job: &ScanJob) -> Self {
        Self {
            subject_id: job.subject_id.to_string(),
            remote_job_id: job.remote_job_id.get(),
            status: job.status.to_string(),
            reason: job.reason.to_string(),
            created_at: job.created_at.to_rfc3339(),
            results_recorded_at: job.results_recorded_at.map(|t| t.to_rfc3339()),
            abandoned_at: job.abandoned_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Status derived from the database when no scan is tracked in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredStatus {
    /// The subject has no scan job
    NeverScanned,
    /// The latest job has stored results
    Finished,
    /// The latest job may still be polled by another process
    Pending,
    /// The latest job never finished and nothing is polling it
    Stuck,
}

/// Status of a subject's scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ScanStatusResponse {
    /// A scan started by this process
    Live {
        state: ScanState,
        percent: Option<u8>,
        job: ScanJobResponse,
    },
    /// Derived from the stored job
    Stored {
        status: StoredStatus,
        job: Option<ScanJobResponse>,
    },
}

/// Fields pulled out of a record's `extracted_data` for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedDataResponse {
    pub name: Option<String>,
    pub age: Option<String>,
    pub addresses: Vec<serde_json::Value>,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub relatives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResultResponse {
    pub remote_job_id: i64,
    pub external_record_id: i64,
    pub status: String,
    pub manually_resolved: bool,
    pub data_broker: String,
    pub link: String,
    pub extracted_data: ExtractedDataResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestScanResponse {
    pub scan: Option<ScanJobResponse>,
    pub results: Vec<ScanResultResponse>,
    pub unresolved_count: usize,
}

/// Outcome of a scan run to completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanRunResponse {
    pub job: ScanJobResponse,
    pub outcome: ScanOutcome,
}

fn strings(data: &serde_json::Value, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn full_name(data: &serde_json::Value) -> Option<String> {
    let parts: Vec<&str> = ["first_name", "middle_name", "last_name"]
        .iter()
        .filter_map(|key| data.get(*key).and_then(|v| v.as_str()))
        .filter(|part| !part.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(" "))
}

/// Convert a stored record to its response form.
fn record_to_response(record: ScanResultRecord) -> ScanResultResponse {
    let data = &record.extracted_data;
    let age = data.get("age").and_then(|v| match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let addresses = data
        .get("addresses")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    ScanResultResponse {
        remote_job_id: record.job_id.get(),
        external_record_id: record.external_record_id,
        status: record.status.to_string(),
        manually_resolved: record.manually_resolved,
        extracted_data: ExtractedDataResponse {
            name: full_name(data),
            age,
            addresses,
            phones: strings(data, "phones"),
            emails: strings(data, "emails"),
            relatives: strings(data, "relatives"),
        },
        data_broker: record.data_broker,
        link: record.link,
    }
}

fn parse_subject(subject_id: &str) -> Result<SubjectId, CommandError> {
    Ok(SubjectId::new(subject_id)?)
}

/// Start the free scan for a subject. Polling continues in the background.
pub async fn start_scan(state: &AppState, subject_id: String) -> Result<ScanJobResponse, CommandError> {
    let subject_id = parse_subject(&subject_id)?;
    let handle = state.orchestrator.start_scan(&subject_id).await?;
    let response = ScanJobResponse::from(handle.job());

    info!(
        subject = %subject_id,
        remote_job_id = response.remote_job_id,
        "Scan started"
    );
    state.track(handle);
    Ok(response)
}

/// Re-trigger an abandoned scan for a subject.
pub async fn retrigger_scan(
    state: &AppState,
    subject_id: String,
) -> Result<ScanJobResponse, CommandError> {
    let subject_id = parse_subject(&subject_id)?;
    let handle = state.orchestrator.retrigger(&subject_id).await?;
    let response = ScanJobResponse::from(handle.job());

    info!(
        subject = %subject_id,
        remote_job_id = response.remote_job_id,
        "Scan re-triggered"
    );
    state.track(handle);
    Ok(response)
}

/// Run the free scan in the calling task until it ends or `cancel` fires.
pub async fn run_scan(
    state: &AppState,
    subject_id: String,
    cancel: CancellationToken,
) -> Result<ScanRunResponse, CommandError> {
    let subject_id = parse_subject(&subject_id)?;
    let report = state.orchestrator.run_scan(&subject_id, cancel).await?;
    Ok(ScanRunResponse {
        job: ScanJobResponse::from(&report.job),
        outcome: report.outcome,
    })
}

/// Status of the subject's scan: live if started by this process, otherwise
/// derived from the stored job. An unfinished stored job reads as `pending`
/// until it is marked abandoned or outlives the polling window.
pub async fn get_scan_status(
    state: &AppState,
    subject_id: String,
) -> Result<ScanStatusResponse, CommandError> {
    let subject_id = parse_subject(&subject_id)?;

    {
        let scans = state
            .active_scans
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = scans.get(&subject_id) {
            let scan_state = handle.state();
            return Ok(ScanStatusResponse::Live {
                percent: scan_state.percent(),
                state: scan_state,
                job: ScanJobResponse::from(handle.job()),
            });
        }
    }

    let latest = scan_jobs::latest_for_subject(state.db.pool(), &subject_id).await?;
    let status = match &latest {
        None => StoredStatus::NeverScanned,
        Some(job) if job.status == ScanJobStatus::Finished => StoredStatus::Finished,
        Some(job) if job.is_abandoned(Utc::now(), state.config.polling.abandon_after()) => {
            StoredStatus::Stuck
        }
        Some(_) => StoredStatus::Pending,
    };

    Ok(ScanStatusResponse::Stored {
        status,
        job: latest.as_ref().map(ScanJobResponse::from),
    })
}

/// Cancel the subject's running scan. Returns whether a scan was running.
pub async fn cancel_scan(state: &AppState, subject_id: String) -> Result<bool, CommandError> {
    let subject_id = parse_subject(&subject_id)?;
    let cancelled = state.cancel_scan(&subject_id);
    if cancelled {
        info!(subject = %subject_id, "Scan cancellation requested");
    }
    Ok(cancelled)
}

/// Latest scan job and its stored results.
pub async fn get_latest_scan_data(
    state: &AppState,
    subject_id: String,
) -> Result<LatestScanResponse, CommandError> {
    let subject_id = parse_subject(&subject_id)?;
    let data = scan_results::latest_scan_data(state.db.pool(), &subject_id).await?;
    let unresolved_count = data.unresolved_count();

    Ok(LatestScanResponse {
        scan: data.scan.as_ref().map(ScanJobResponse::from),
        results: data.results.into_iter().map(record_to_response).collect(),
        unresolved_count,
    })
}

/// Mark a result as resolved (or unresolved) by hand.
pub async fn set_result_resolved(
    state: &AppState,
    remote_job_id: i64,
    external_record_id: i64,
    resolved: bool,
) -> Result<(), CommandError> {
    scan_results::set_manually_resolved(
        state.db.pool(),
        RemoteJobId::new(remote_job_id),
        external_record_id,
        resolved,
    )
    .await?;
    Ok(())
}
