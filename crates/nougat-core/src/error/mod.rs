//! Error types and result aliases for Nougat operations.
//!
//! Provides a unified error type that covers all possible error conditions
//! across the Nougat ecosystem. Errors are cloneable so a single failed
//! oracle request can be reported to every resolver awaiting its handle.

use thiserror::Error;

/// Unified error type for all Nougat operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NougatError {
    // Oracle errors
    #[error("Could not retrieve details for package '{package}' {version}: {message}")]
    PackageDetailsUnavailable {
        package: String,
        version: String,
        message: String,
    },

    #[error("Request for package '{package}' timed out after {waited_secs}s. Sources tried:\n{}", sources.join("\n"))]
    RequestTimeout {
        package: String,
        sources: Vec<String>,
        waited_secs: u64,
    },

    #[error("Request for package '{package}' timed out before, not waiting again")]
    NotWaitingAgain { package: String },

    // Work queue errors
    #[error("Work queue was shut down before the request completed")]
    QueueShutDown,

    #[error("Request was cancelled and timed out of its grace period")]
    CancellationTimeout,

    // Resolution errors
    #[error("Resolution produced a conflict:\n{report}")]
    ResolutionConflict { report: String },

    #[error("Resolver invariant violated: {message}")]
    InvariantViolation { message: String },
}

/// Result type alias for Nougat operations
pub type NougatResult<T> = Result<T, NougatError>;

impl NougatError {
    /// Create a details-unavailable error from any error type
    pub fn details_unavailable<E>(package: String, version: String, source: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::PackageDetailsUnavailable {
            package,
            version,
            message: source.to_string(),
        }
    }

    /// Check if this error is a timeout of any flavour
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            NougatError::RequestTimeout { .. }
                | NougatError::NotWaitingAgain { .. }
                | NougatError::CancellationTimeout
        )
    }

    /// Check if this error should be captured as a non-fatal exploration
    /// failure rather than aborting the whole search
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NougatError::PackageDetailsUnavailable { .. })
    }
}
