//! Exposure Provider - client for the third-party exposure scanning service.
//!
//! The provider searches data broker sites for a subscriber's profile. This
//! crate defines the narrow contract the orchestrator relies on
//! ([`ScanProviderClient`]) and an HTTP implementation ([`HttpScanProvider`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use exposure_provider::{HttpScanProvider, ScanProviderClient};
//!
//! let provider = HttpScanProvider::from_config(&config.provider)?;
//! let job = provider.create_job(profile_ref).await?;
//! let status = provider.job_status(profile_ref, job.id).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod client;
pub mod error;
pub mod http;

// Re-export commonly used types
pub use client::{RemoteJob, ResultPage, ScanProviderClient};
pub use error::{ProviderError, Result};
pub use http::HttpScanProvider;
