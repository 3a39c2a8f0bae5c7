//! Result records reported by the scanning provider.

use crate::error::ExposureError;
use crate::types::RemoteJobId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Removal status of a single exposure on a data broker site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanResultStatus {
    /// Newly discovered exposure
    New,
    /// Opt-out submitted, waiting for the broker to verify
    WaitingForVerification,
    /// Opt-out being processed
    OptoutInProgress,
    /// Listing has been removed
    Removed,
}

impl ScanResultStatus {
    /// Wire/storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::WaitingForVerification => "waiting_for_verification",
            Self::OptoutInProgress => "optout_in_progress",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for ScanResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanResultStatus {
    type Err = ExposureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "waiting_for_verification" => Ok(Self::WaitingForVerification),
            "optout_in_progress" => Ok(Self::OptoutInProgress),
            "removed" => Ok(Self::Removed),
            other => Err(ExposureError::Validation(format!(
                "unknown scan result status '{other}'"
            ))),
        }
    }
}

/// One exposure found by a scan job.
///
/// Written once when the job finishes. Only `manually_resolved` may change
/// afterwards, and only through collaborators outside the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResultRecord {
    /// Provider job that produced this record
    pub job_id: RemoteJobId,
    /// Provider-side identifier of the record
    pub external_record_id: i64,
    /// Removal status
    pub status: ScanResultStatus,
    /// Whether the subscriber marked the exposure as handled
    pub manually_resolved: bool,
    /// Name of the data broker listing the subject
    pub data_broker: String,
    /// Link to the listing
    pub link: String,
    /// Listing details (names, age, addresses, phones, emails, relatives)
    pub extracted_data: JsonValue,
}

impl ScanResultRecord {
    /// Whether this record still needs the subscriber's attention.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        self.status == ScanResultStatus::New && !self.manually_resolved
    }
}
