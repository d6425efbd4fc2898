//! Error types for the forwarding engine.
//!
//! Control-plane operations return these synchronously. Failures on the
//! packet path are never returned to a caller; they are counted on the
//! owning object and logged.

use thiserror::Error;

/// Errors returned by forwarding-engine operations.
#[derive(Debug, Error)]
pub enum FwdError {
    /// Malformed request: unknown type, missing field, length mismatch.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Reference to an object id that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request is valid but arrived in the wrong order.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// No handler exists for the request.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// A frame could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Registry corruption or another broken invariant.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FwdError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        FwdError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        FwdError::NotFound(msg.into())
    }

    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        FwdError::FailedPrecondition(msg.into())
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        FwdError::Unimplemented(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        FwdError::Parse(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        FwdError::Internal(msg.into())
    }

    /// Returns true for [`FwdError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, FwdError::NotFound(_))
    }
}

impl From<vdp_types::ParseError> for FwdError {
    fn from(e: vdp_types::ParseError) -> Self {
        FwdError::InvalidArgument(e.to_string())
    }
}

/// Result type alias for forwarding-engine operations.
pub type Result<T> = std::result::Result<T, FwdError>;
