//! Unified error types for the domain layer
//!
//! Every workshop handler returns `Result<_, DomainError>`. The state machine
//! catches these at the dispatch boundary, so an error never escapes into the
//! transport layer.

use thiserror::Error;

/// Unified error type for domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Validation failed (e.g., invalid field values)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A role name that is not one of the workshop's two roles
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// State transition not allowed
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// `enter` hooks kept requesting transitions past the hop limit
    #[error("Transition loop detected after {hops} hops (last phase: {phase})")]
    TransitionLoop { hops: usize, phase: String },

    /// Parse error (for value objects)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl DomainError {
    /// Creates a validation error for business rule violations.
    ///
    /// # Example
    /// ```ignore
    /// if roles.first == roles.second {
    ///     return Err(DomainError::validation("roles must be distinct"));
    /// }
    /// ```
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an unknown role error
    pub fn unknown_role(role: impl Into<String>) -> Self {
        Self::UnknownRole(role.into())
    }

    /// Create an invalid state transition error
    pub fn invalid_state_transition(msg: impl Into<String>) -> Self {
        Self::InvalidStateTransition(msg.into())
    }

    /// Creates a parse error for string-to-type conversion failures.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}
