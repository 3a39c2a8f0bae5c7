//! Error type returned by application commands.

use exposure_core::{ConfigError, ExposureError};
use exposure_db::DatabaseError;
use exposure_provider::ProviderError;
use exposure_scanner::ScanError;
use serde::Serialize;
use std::fmt;

/// Serializable command error with a stable `code` for callers to match on.
#[derive(Debug, Serialize)]
pub struct CommandError {
    /// Error code (e.g., "INELIGIBLE_SUBJECT")
    pub code: String,
    /// User-friendly error message
    pub message: String,
    /// Optional debugging context
    pub details: Option<serde_json::Value>,
}

impl CommandError {
    /// Create a new command error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Create a command error with details.
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Some(details),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CommandError {}

impl From<ScanError> for CommandError {
    fn from(err: ScanError) -> Self {
        let message = err.to_string();
        match err {
            ScanError::IneligibleSubject { subject_id } => Self::with_details(
                "INELIGIBLE_SUBJECT",
                message,
                serde_json::json!({ "subject_id": subject_id }),
            ),
            ScanError::MissingSubject { subject_id } => Self::with_details(
                "SUBJECT_NOT_FOUND",
                message,
                serde_json::json!({ "subject_id": subject_id }),
            ),
            ScanError::MissingProfile { subject_id } => Self::with_details(
                "PROFILE_MISSING",
                message,
                serde_json::json!({ "subject_id": subject_id }),
            ),
            ScanError::AlreadyRunning { subject_id } => Self::with_details(
                "SCAN_ALREADY_RUNNING",
                message,
                serde_json::json!({ "subject_id": subject_id }),
            ),
            ScanError::NotRetriggerable { subject_id } => Self::with_details(
                "SCAN_NOT_RETRIGGERABLE",
                message,
                serde_json::json!({ "subject_id": subject_id }),
            ),
            ScanError::Provider(err) => err.into(),
            ScanError::Persistence { remote_job_id, .. } => Self::with_details(
                "PERSISTENCE_FAILED",
                message,
                serde_json::json!({ "remote_job_id": remote_job_id }),
            ),
            ScanError::Database(err) => err.into(),
            ScanError::Task(_) => Self::new("INTERNAL_ERROR", message),
        }
    }
}

impl From<ProviderError> for CommandError {
    fn from(err: ProviderError) -> Self {
        let message = format!("Scan provider unavailable: {err}");
        match err {
            ProviderError::ApiError { status, .. } => Self::with_details(
                "PROVIDER_UNAVAILABLE",
                message,
                serde_json::json!({ "status": status }),
            ),
            _ => Self::new("PROVIDER_UNAVAILABLE", message),
        }
    }
}

impl From<DatabaseError> for CommandError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound | DatabaseError::NotFoundWithMessage(_) => {
                Self::new("NOT_FOUND", err.to_string())
            }
            DatabaseError::Conflict(msg) => Self::new("CONFLICT", msg),
            _ => Self::new("DATABASE_ERROR", format!("Database error: {err}")),
        }
    }
}

impl From<ExposureError> for CommandError {
    fn from(err: ExposureError) -> Self {
        match err {
            ExposureError::Validation(msg) => Self::new("INVALID_INPUT", msg),
            ExposureError::Config(err) => err.into(),
            other => Self::new("INTERNAL_ERROR", other.to_string()),
        }
    }
}

impl From<ConfigError> for CommandError {
    fn from(err: ConfigError) -> Self {
        Self::new("CONFIG_ERROR", format!("Configuration error: {err}"))
    }
}
