//! Exposure Scanner - eligibility, pagination and polling for provider scans.
//!
//! The [`PollingOrchestrator`] starts a provider scan for an eligible
//! subject, polls the job on a fixed tick with a bounded attempt budget,
//! and once the provider reports `finished` fetches every result page and
//! stores the merged set in one write.
//!
//! # Example
//!
//! ```rust,ignore
//! use exposure_scanner::PollingOrchestrator;
//!
//! let orchestrator = PollingOrchestrator::with_database(provider, db, &config);
//! let handle = orchestrator.start_scan(&subject_id).await?;
//! let outcome = handle.wait().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod eligibility;
pub mod error;
pub mod orchestrator;
pub mod paginator;
pub mod store;

// Re-export commonly used types
pub use eligibility::{Eligibility, EligibilityGate};
pub use error::{Result, ScanError};
pub use orchestrator::{
    PollAttempt, PollingOrchestrator, ScanHandle, ScanOutcome, ScanReport, ScanState,
};
pub use paginator::ResultPaginator;
pub use store::{FlagSource, ScanHistory, ScanStore, Subject, SubjectDirectory};
pub use tokio_util::sync::CancellationToken;
