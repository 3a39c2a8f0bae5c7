//! Shared types used across the exposure-scan workspace.
//!
//! Identifiers are newtypes so a subscriber id can never be passed where a
//! provider profile or a provider job id is expected.

use crate::error::ExposureError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Identifier of a subscriber (the subject of a scan).
///
/// Subject IDs are 1-64 characters of ASCII letters, digits, `-` or `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    /// Create a new `SubjectId` from a string.
    ///
    /// # Errors
    /// Returns error if the ID is empty, too long, or contains other characters.
    pub fn new(id: impl Into<String>) -> Result<Self, ExposureError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<(), ExposureError> {
        static SUBJECT_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = SUBJECT_REGEX
            .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid regex"));

        if regex.is_match(id) {
            Ok(())
        } else {
            Err(ExposureError::Validation(format!(
                "invalid subject ID: must be 1-64 characters of [A-Za-z0-9_-], got '{id}'"
            )))
        }
    }
}

impl TryFrom<String> for SubjectId {
    type Error = ExposureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubjectId> for String {
    fn from(id: SubjectId) -> Self {
        id.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the subject's profile at the scanning provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileRef(i64);

impl ProfileRef {
    /// Create a new `ProfileRef`.
    ///
    /// # Errors
    /// Returns error if the reference is not a positive integer.
    pub fn new(id: i64) -> Result<Self, ExposureError> {
        if id > 0 {
            Ok(Self(id))
        } else {
            Err(ExposureError::Validation(format!(
                "invalid profile reference: must be positive, got {id}"
            )))
        }
    }

    /// Get the raw provider identifier.
    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ProfileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier the scanning provider assigned to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteJobId(i64);

impl RemoteJobId {
    /// Wrap a provider job identifier.
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw provider identifier.
    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RemoteJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job status as reported by the scanning provider.
///
/// This is independent of the orchestrator's own attempt tracking: a job the
/// orchestrator gave up on keeps whichever status was last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanJobStatus {
    /// Accepted by the provider, work not started
    Pending,
    /// Provider is searching
    InProgress,
    /// Provider has finished; results can be listed
    Finished,
}

impl ScanJobStatus {
    /// Wire/storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Finished => "finished",
        }
    }

    /// Whether the provider will not change this status again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl fmt::Display for ScanJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanJobStatus {
    type Err = ExposureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "finished" => Ok(Self::Finished),
            other => Err(ExposureError::Validation(format!(
                "unknown scan status '{other}'"
            ))),
        }
    }
}

/// Why a scan job was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanReason {
    /// The one-time free scan
    Initial,
    /// Operator re-trigger of an abandoned job
    Manual,
}

impl ScanReason {
    /// Wire/storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ScanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanReason {
    type Err = ExposureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "manual" => Ok(Self::Manual),
            other => Err(ExposureError::Validation(format!(
                "unknown scan reason '{other}'"
            ))),
        }
    }
}
