//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur when building or decoding core values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Module name does not satisfy the naming rules
    #[error("Invalid module name {name:?}: {reason}")]
    InvalidModuleName { name: String, reason: String },

    /// Answer payload does not have the `{"result": [status, payload?]}` shape
    #[error("Malformed answer: {reason}")]
    MalformedAnswer { reason: String },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
