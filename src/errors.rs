// Copyright 2025 Cowboy AI, LLC.

//! Error types for cohort analysis operations

use thiserror::Error;

/// Errors that can occur while deriving cohorts or computing statistics
///
/// The taxonomy mirrors the failure surface of the core: backend failures
/// propagate to the immediate caller without retries or silent defaults;
/// validation failures fail fast before any backend call.
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    /// Network or server failure on a Backend Access Port call
    #[error("Backend unavailable: {service} - {message}")]
    BackendUnavailable {
        /// Which backend route failed
        service: String,
        /// Error message from the backend
        message: String,
    },

    /// A cohort's own predicate set is self-contradictory
    #[error("Filter contradiction on cohort {cohort}")]
    FilterContradiction {
        /// The cohort whose predicates conflict
        cohort: String,
    },

    /// Attribute/filter count mismatch in a multi-filter request
    #[error("Arity mismatch: {attributes} attributes but {filters} filters")]
    ArityMismatch {
        /// Number of attributes supplied
        attributes: usize,
        /// Number of filter predicates supplied
        filters: usize,
    },

    /// Mid-chain failure in the filter composition engine
    ///
    /// Cohorts already created server-side during the failed chain are not
    /// cleaned up; the step index and attribute label identify where the
    /// chain stopped.
    #[error("Filter chain aborted at step {step} ({attribute}): {source}")]
    ChainAborted {
        /// Zero-based index of the failed step
        step: usize,
        /// Label of the attribute whose filter failed
        attribute: String,
        /// The underlying failure
        source: Box<AnalysisError>,
    },

    /// An attribute declined a filter operation it does not support
    #[error("Filter not supported by attribute {attribute}: {reason}")]
    FilterNotSupported {
        /// Label of the declining attribute
        attribute: String,
        /// Why the operation was declined
        reason: String,
    },

    /// Entity not found
    #[error("Entity not found: {entity_type} with id {id}")]
    EntityNotFound {
        /// Type of entity that wasn't found
        entity_type: String,
        /// ID that was searched for
        id: String,
    },

    /// Invalid operation
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Reason why the operation is invalid
        reason: String,
    },

    /// Invariant violation
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type for cohort analysis operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

impl From<serde_json::Error> for AnalysisError {
    fn from(err: serde_json::Error) -> Self {
        AnalysisError::SerializationError(err.to_string())
    }
}

impl AnalysisError {
    /// Create a backend failure for a named route
    pub fn backend(service: impl Into<String>, message: impl Into<String>) -> Self {
        AnalysisError::BackendUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Check if this is a backend failure (directly or inside an aborted chain)
    pub fn is_backend_error(&self) -> bool {
        match self {
            AnalysisError::BackendUnavailable { .. } => true,
            AnalysisError::ChainAborted { source, .. } => source.is_backend_error(),
            _ => false,
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AnalysisError::EntityNotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            AnalysisError::ArityMismatch { .. }
                | AnalysisError::InvariantViolation(_)
                | AnalysisError::FilterContradiction { .. }
        )
    }

    /// Check if this is a mid-chain abort
    pub fn is_chain_abort(&self) -> bool {
        matches!(self, AnalysisError::ChainAborted { .. })
    }
}
