//! Exposure Core - Foundation crate for the exposure-scan workspace.
//!
//! This crate provides the shared identifiers, status enums, result records,
//! error handling and configuration management that every other crate in the
//! workspace depends on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Newtypes and enums (`SubjectId`, `ProfileRef`, `RemoteJobId`, `ScanJobStatus`)
//! - [`records`] - Result records returned by the scanning provider
//!
//! # Example
//!
//! ```rust
//! use exposure_core::{AppConfig, ScanJobStatus};
//!
//! let config = AppConfig::default();
//! assert_eq!(config.polling.max_attempts, 15);
//! assert!(ScanJobStatus::Finished.is_terminal());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod records;
pub mod types;

// Re-export commonly used types
pub use config::{AppConfig, DatabaseConfig, EligibilityConfig, PollingConfig, ProviderConfig};
pub use error::{ConfigError, ConfigResult, ExposureError, Result};
pub use records::{ScanResultRecord, ScanResultStatus};
pub use types::{ProfileRef, RemoteJobId, ScanJobStatus, ScanReason, SubjectId};
