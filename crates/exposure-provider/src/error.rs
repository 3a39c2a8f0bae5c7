//! Error types for the scanning provider client.

use thiserror::Error;

/// Errors returned by calls to the scanning provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Non-success HTTP status
    #[error("API error ({provider}): status {status}, {message}")]
    ApiError {
        /// Provider name
        provider: String,
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Response could not be understood
    #[error("failed to parse response from {provider}: {message}")]
    ParseError {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Provider returned a page other than the one requested
    #[error("requested result page {requested}, provider returned page {returned}")]
    PageMismatch {
        /// Page number asked for
        requested: u32,
        /// Page number in the response
        returned: u32,
    },

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Whether a later call could succeed without any change on our side.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::ApiError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;
