use exposure_core::{RemoteJobId, SubjectId};
use exposure_db::DatabaseError;
use exposure_provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("subject {subject_id} is not eligible for a free scan")]
    IneligibleSubject { subject_id: SubjectId },

    #[error("subject {subject_id} not found")]
    MissingSubject { subject_id: SubjectId },

    #[error("subject {subject_id} has no provider profile")]
    MissingProfile { subject_id: SubjectId },

    #[error("a scan is already running for subject {subject_id}")]
    AlreadyRunning { subject_id: SubjectId },

    #[error("subject {subject_id} has no abandoned scan to re-trigger")]
    NotRetriggerable { subject_id: SubjectId },

    #[error("provider unavailable: {0}")]
    Provider(#[from] ProviderError),

    #[error("failed to persist scan job {remote_job_id}: {source}")]
    Persistence {
        remote_job_id: RemoteJobId,
        #[source]
        source: DatabaseError,
    },

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("scan task failed: {0}")]
    Task(String),
}

impl ScanError {
    /// Whether the scan was refused before any provider job was created.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::IneligibleSubject { .. }
                | Self::MissingSubject { .. }
                | Self::MissingProfile { .. }
                | Self::AlreadyRunning { .. }
                | Self::NotRetriggerable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
