//! Free-scan eligibility.
//!
//! A subject may receive the free scan only if it has never had a scan job.
//! When a feature flag is configured it must also be on for the subject.
//! Any storage failure denies the scan.

use crate::store::{FlagSource, ScanHistory, Subject};
use std::fmt;
use std::sync::Arc;

/// Outcome of an eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// The subject may be scanned
    Eligible,
    /// The subject already has a scan job
    PriorScan,
    /// The free-scan feature flag is off for this subject
    FlagDisabled,
    /// Scan history or flags could not be read
    Unavailable,
}

impl Eligibility {
    /// Whether the check allows a scan.
    #[must_use]
    pub fn is_eligible(self) -> bool {
        self == Self::Eligible
    }
}

/// Decides whether a subject may receive the one-time free scan.
#[derive(Clone)]
pub struct EligibilityGate {
    history: Arc<dyn ScanHistory>,
    flag: Option<(Arc<dyn FlagSource>, String)>,
}

impl fmt::Debug for EligibilityGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EligibilityGate")
            .field("flag", &self.flag.as_ref().map(|(_, name)| name))
            .finish_non_exhaustive()
    }
}

impl EligibilityGate {
    /// Gate on scan history only.
    #[must_use]
    pub fn new(history: Arc<dyn ScanHistory>) -> Self {
        Self {
            history,
            flag: None,
        }
    }

    /// Additionally require `flag` to be on for the subject.
    #[must_use]
    pub fn with_feature_flag(mut self, flags: Arc<dyn FlagSource>, flag: impl Into<String>) -> Self {
        self.flag = Some((flags, flag.into()));
        self
    }

    /// Scan history this gate reads from.
    #[must_use]
    pub fn history(&self) -> &Arc<dyn ScanHistory> {
        &self.history
    }

    /// Whether the subject may receive the free scan.
    pub async fn is_eligible(&self, subject: &Subject) -> bool {
        self.check(subject).await.is_eligible()
    }

    /// Evaluate eligibility, keeping the reason for a denial.
    pub async fn check(&self, subject: &Subject) -> Eligibility {
        match self.history.has_scan_job(&subject.id).await {
            Ok(true) => {
                tracing::debug!("Subject {} already has a scan job", subject.id);
                return Eligibility::PriorScan;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    "Could not read scan history for {}, denying scan: {}",
                    subject.id,
                    e
                );
                return Eligibility::Unavailable;
            }
        }

        let Some((flags, name)) = &self.flag else {
            return Eligibility::Eligible;
        };

        match flags.is_enabled(name, Some(subject.email.as_str())).await {
            Ok(true) => Eligibility::Eligible,
            Ok(false) => Eligibility::FlagDisabled,
            Err(e) => {
                tracing::warn!("Could not evaluate flag {}, denying scan: {}", name, e);
                Eligibility::Unavailable
            }
        }
    }
}
