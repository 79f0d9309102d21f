//! Error types for `embervec`.
//!
//! This module provides a unified error type for all `embervec` operations.
//! Each variant carries a stable wire-level code so callers across a language
//! boundary can match on the code rather than the message text.

use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for `embervec` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in `embervec` operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Vector dimension did not match the namespace's configured dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension supplied.
        actual: usize,
    },

    /// A vector with the requested id does not exist in the namespace.
    #[error("vector '{0}' not found")]
    VectorNotFound(String),

    /// Input failed validation (bad id, bad metadata shape, malformed filter).
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// The backing store's quota has been exceeded.
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A namespace with this name already exists.
    #[error("namespace '{0}' already exists")]
    NamespaceExists(String),

    /// The requested namespace does not exist.
    #[error("namespace '{0}' not found")]
    NamespaceNotFound(String),

    /// A namespace name failed the naming rules.
    #[error("invalid namespace name '{name}': {reason}")]
    NamespaceInvalidName {
        /// The offending name.
        name: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A batch operation partially failed.
    #[error("batch partial failure: {succeeded} succeeded, {failed} failed")]
    BatchPartialFailure {
        /// Number of items that succeeded.
        succeeded: usize,
        /// Number of items that failed.
        failed: usize,
        /// Per-id error messages.
        errors: HashMap<String, String>,
    },

    /// A PQ codec operation was attempted before the codebook was trained.
    #[error("codebook untrained for this namespace")]
    CodebookUntrained,

    /// Adaptive scalar quantization could not satisfy the requested precision loss.
    #[error("quality below threshold: {0}")]
    QualityBelowThreshold(String),

    /// A backing-store transaction failed.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// An operation exceeded its allotted time.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
    },

    /// An operation was cancelled via its abort signal.
    #[error("operation aborted: {0}")]
    Aborted(String),

    /// An invariant was violated; indicates a bug rather than bad input.
    #[error("internal error: {0}")]
    Internal(String),

    /// A PQ subspace received fewer training vectors than `K`.
    #[error("insufficient training data: need at least {required}, got {got}")]
    InsufficientTrainingData {
        /// Minimum vectors required (per subspace, = K).
        required: usize,
        /// Vectors actually supplied.
        got: usize,
    },

    /// IO error bubbled up from the backing store or persistence layer.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization of a persisted layout failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns the stable wire-level error code (e.g. `"DIMENSION_MISMATCH"`).
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::VectorNotFound(_) => "VECTOR_NOT_FOUND",
            Self::InvalidFormat(_) => "INVALID_FORMAT",
            Self::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            Self::NamespaceExists(_) => "NAMESPACE_EXISTS",
            Self::NamespaceNotFound(_) => "NAMESPACE_NOT_FOUND",
            Self::NamespaceInvalidName { .. } => "NAMESPACE_INVALID_NAME",
            Self::BatchPartialFailure { .. } => "BATCH_PARTIAL_FAILURE",
            Self::CodebookUntrained => "CODEBOOK_UNTRAINED",
            Self::QualityBelowThreshold(_) => "QUALITY_BELOW_THRESHOLD",
            Self::TransactionFailed(_) => "TRANSACTION_FAILED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Aborted(_) => "ABORTED",
            Self::Internal(_) | Self::InsufficientTrainingData { .. } | Self::Serialization(_) => {
                "INTERNAL"
            }
            Self::Io(_) => "INTERNAL",
        }
    }

    /// Returns true if retrying the same call might succeed (e.g. a transient
    /// backing-store failure), as opposed to a validation or corruption error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::QuotaExceeded(_) | Self::TransactionFailed(_) | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_code() {
        let err = Error::DimensionMismatch {
            expected: 3,
            actual: 4,
        };
        assert_eq!(err.code(), "DIMENSION_MISMATCH");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn quota_exceeded_is_recoverable() {
        let err = Error::QuotaExceeded("over budget".into());
        assert!(err.is_recoverable());
        assert_eq!(err.code(), "QUOTA_EXCEEDED");
    }
}
