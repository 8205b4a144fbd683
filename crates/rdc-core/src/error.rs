//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Channel label was empty
    #[error("Channel label must not be empty")]
    EmptyLabel,

    /// Degree range is inverted or leaves the 0-180 domain
    #[error("Invalid degree range {min}..={max} (expected {expected})")]
    InvalidRange {
        min: i32,
        max: i32,
        expected: String,
    },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
