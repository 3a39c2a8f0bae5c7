//! Contract of the external scanning provider.

use crate::error::Result;
use async_trait::async_trait;
use exposure_core::{ProfileRef, RemoteJobId, ScanJobStatus, ScanResultRecord};
use serde::{Deserialize, Serialize};

/// Operations the orchestrator needs from a scanning provider.
///
/// Implementations are shared between concurrently polled jobs and must be
/// thread-safe (Send + Sync).
#[async_trait]
pub trait ScanProviderClient: Send + Sync {
    /// Start a scan for a profile.
    ///
    /// Starts work on the provider side; callers invoke this once per
    /// eligible subject.
    async fn create_job(&self, profile: ProfileRef) -> Result<RemoteJob>;

    /// Read the current status of a job.
    async fn job_status(&self, profile: ProfileRef, job: RemoteJobId) -> Result<ScanJobStatus>;

    /// Read one page of the profile's scan results. Pages are 1-based.
    async fn fetch_result_page(
        &self,
        profile: ProfileRef,
        page: u32,
        page_size: u32,
    ) -> Result<ResultPage>;

    /// Short identifier used in logs and errors.
    fn provider_id(&self) -> &str;
}

/// A job as acknowledged by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteJob {
    /// Provider-assigned identifier
    pub id: RemoteJobId,
    /// Status at creation time
    pub status: ScanJobStatus,
}

/// One page of scan results. Never persisted as such.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPage {
    /// Records on this page, in provider order
    pub items: Vec<ScanResultRecord>,
    /// 1-based number of this page
    pub page_number: u32,
    /// Number of the last page
    pub last_page_number: u32,
}

impl ResultPage {
    /// Whether no page follows this one.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.page_number >= self.last_page_number
    }
}
