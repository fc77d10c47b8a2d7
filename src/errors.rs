/*!
 * Error types for the parabatch library.
 *
 * This module contains custom error types for different parts of the library,
 * using the thiserror crate for ergonomic error definitions.
 */

use thiserror::Error;

/// Errors that can occur when working with provider APIs
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// The request did not finish before its deadline
    #[error("Request timed out after {after_ms} ms")]
    Timeout {
        /// Deadline that elapsed, in milliseconds
        after_ms: u64,
    },

    /// The request was cancelled by the caller
    #[error("Request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Map a transport error from reqwest onto the provider taxonomy
    pub fn from_reqwest(error: reqwest::Error, timeout_ms: u64) -> Self {
        if error.is_timeout() {
            Self::Timeout { after_ms: timeout_ms }
        } else if error.is_connect() {
            Self::ConnectionError(error.to_string())
        } else {
            Self::RequestFailed(error.to_string())
        }
    }

    /// Map a non-success HTTP status onto the provider taxonomy
    pub fn from_status(status_code: u16, message: String) -> Self {
        match status_code {
            401 | 403 => Self::AuthenticationError(message),
            429 => Self::RateLimitExceeded(message),
            _ => Self::ApiError { status_code, message },
        }
    }
}

/// Errors raised by a document store backend
#[derive(Error, Debug)]
pub enum StoreError {
    /// The storage backend rejected or failed the operation
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A stored value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Backend(error.to_string())
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(error: anyhow::Error) -> Self {
        Self::Backend(format!("{:#}", error))
    }
}

/// Errors that end a translation attempt.
///
/// Every variant raised after planning carries the completed/total batch
/// counts so the caller can tell how much of the document is already
/// translated and offer a cheap retry.
#[derive(Error, Debug)]
pub enum TranslationError {
    /// The document cannot be turned into batches
    #[error("Planning failed: {0}")]
    Planning(String),

    /// A batch failed at the provider
    #[error("Batch {batch_index} failed ({completed_batches}/{total_batches} batches done): {source}")]
    Provider {
        /// Zero-based index of the failing batch
        batch_index: usize,
        /// Batches already persisted
        completed_batches: usize,
        /// Batches in the plan
        total_batches: usize,
        /// Underlying provider failure
        #[source]
        source: ProviderError,
    },

    /// A batch exceeded its deadline
    #[error("Batch {batch_index} timed out after {after_ms} ms ({completed_batches}/{total_batches} batches done)")]
    Timeout {
        /// Zero-based index of the failing batch
        batch_index: usize,
        /// Batches already persisted
        completed_batches: usize,
        /// Batches in the plan
        total_batches: usize,
        /// Deadline that elapsed
        after_ms: u64,
    },

    /// Progress could not be written durably
    #[error("Failed to persist progress ({completed_batches}/{total_batches} batches done): {source}")]
    Persistence {
        /// Batches persisted before the failing write
        completed_batches: usize,
        /// Batches in the plan
        total_batches: usize,
        /// Underlying store failure
        #[source]
        source: StoreError,
    },

    /// The caller cancelled the translation
    #[error("Translation cancelled ({completed_batches}/{total_batches} batches done)")]
    Cancelled {
        /// Batches already persisted
        completed_batches: usize,
        /// Batches in the plan
        total_batches: usize,
    },

    /// Nothing is stored under the requested translation id
    #[error("No translation found for id {0}")]
    NotFound(String),

    /// Another run of the same translation id is in progress
    #[error("Translation {0} is already running")]
    AlreadyRunning(String),
}

impl TranslationError {
    /// Batches already persisted when the error was raised
    pub fn completed_batches(&self) -> Option<usize> {
        match self {
            Self::Provider { completed_batches, .. }
            | Self::Timeout { completed_batches, .. }
            | Self::Persistence { completed_batches, .. }
            | Self::Cancelled { completed_batches, .. } => Some(*completed_batches),
            Self::Planning(_) | Self::NotFound(_) | Self::AlreadyRunning(_) => None,
        }
    }

    /// Total batches in the plan, if planning succeeded
    pub fn total_batches(&self) -> Option<usize> {
        match self {
            Self::Provider { total_batches, .. }
            | Self::Timeout { total_batches, .. }
            | Self::Persistence { total_batches, .. }
            | Self::Cancelled { total_batches, .. } => Some(*total_batches),
            Self::Planning(_) | Self::NotFound(_) | Self::AlreadyRunning(_) => None,
        }
    }

    /// Whether a retry can pick up from persisted progress
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::Timeout { .. } | Self::Cancelled { .. }
        )
    }
}
