//! SAI error types and status handling.
//!
//! Every SAI-shaped operation returns a [`SaiResult`]. Errors carry the SAI
//! status they map to, so a caller speaking the SAI wire contract can report
//! `sai_status_t` values unchanged.

use std::fmt;
use thiserror::Error;
use vdp_fwd::FwdError;

/// SAI status codes.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaiStatus {
    Success = 0,
    Failure = -1,
    NotSupported = -2,
    NoMemory = -3,
    InsufficientResources = -4,
    InvalidParameter = -5,
    ItemAlreadyExists = -6,
    ItemNotFound = -7,
    BufferOverflow = -8,
    InvalidPortNumber = -9,
    InvalidPortMember = -10,
    InvalidVlanId = -11,
    Uninitialized = -12,
    TableFull = -13,
    MandatoryAttributeMissing = -14,
    NotImplemented = -15,
    AddrNotFound = -16,
    ObjectInUse = -17,
    InvalidObjectType = -18,
    InvalidObjectId = -19,
    NotExecuted = -23,
    InvalidAttribute = -24,
}

impl SaiStatus {
    const ALL: [SaiStatus; 22] = [
        SaiStatus::Success,
        SaiStatus::Failure,
        SaiStatus::NotSupported,
        SaiStatus::NoMemory,
        SaiStatus::InsufficientResources,
        SaiStatus::InvalidParameter,
        SaiStatus::ItemAlreadyExists,
        SaiStatus::ItemNotFound,
        SaiStatus::BufferOverflow,
        SaiStatus::InvalidPortNumber,
        SaiStatus::InvalidPortMember,
        SaiStatus::InvalidVlanId,
        SaiStatus::Uninitialized,
        SaiStatus::TableFull,
        SaiStatus::MandatoryAttributeMissing,
        SaiStatus::NotImplemented,
        SaiStatus::AddrNotFound,
        SaiStatus::ObjectInUse,
        SaiStatus::InvalidObjectType,
        SaiStatus::InvalidObjectId,
        SaiStatus::NotExecuted,
        SaiStatus::InvalidAttribute,
    ];

    /// Creates a SaiStatus from a raw i32 value; unknown codes are failures.
    pub fn from_raw(status: i32) -> Self {
        Self::ALL
            .into_iter()
            .find(|s| *s as i32 == status)
            .unwrap_or(SaiStatus::Failure)
    }

    pub fn is_success(&self) -> bool {
        *self == SaiStatus::Success
    }

    pub fn into_result(self) -> SaiResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(SaiError::from_status(self))
        }
    }
}

impl fmt::Display for SaiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SaiStatus::Success => "SAI_STATUS_SUCCESS",
            SaiStatus::Failure => "SAI_STATUS_FAILURE",
            SaiStatus::NotSupported => "SAI_STATUS_NOT_SUPPORTED",
            SaiStatus::NoMemory => "SAI_STATUS_NO_MEMORY",
            SaiStatus::InsufficientResources => "SAI_STATUS_INSUFFICIENT_RESOURCES",
            SaiStatus::InvalidParameter => "SAI_STATUS_INVALID_PARAMETER",
            SaiStatus::ItemAlreadyExists => "SAI_STATUS_ITEM_ALREADY_EXISTS",
            SaiStatus::ItemNotFound => "SAI_STATUS_ITEM_NOT_FOUND",
            SaiStatus::BufferOverflow => "SAI_STATUS_BUFFER_OVERFLOW",
            SaiStatus::InvalidPortNumber => "SAI_STATUS_INVALID_PORT_NUMBER",
            SaiStatus::InvalidPortMember => "SAI_STATUS_INVALID_PORT_MEMBER",
            SaiStatus::InvalidVlanId => "SAI_STATUS_INVALID_VLAN_ID",
            SaiStatus::Uninitialized => "SAI_STATUS_UNINITIALIZED",
            SaiStatus::TableFull => "SAI_STATUS_TABLE_FULL",
            SaiStatus::MandatoryAttributeMissing => "SAI_STATUS_MANDATORY_ATTRIBUTE_MISSING",
            SaiStatus::NotImplemented => "SAI_STATUS_NOT_IMPLEMENTED",
            SaiStatus::AddrNotFound => "SAI_STATUS_ADDR_NOT_FOUND",
            SaiStatus::ObjectInUse => "SAI_STATUS_OBJECT_IN_USE",
            SaiStatus::InvalidObjectType => "SAI_STATUS_INVALID_OBJECT_TYPE",
            SaiStatus::InvalidObjectId => "SAI_STATUS_INVALID_OBJECT_ID",
            SaiStatus::NotExecuted => "SAI_STATUS_NOT_EXECUTED",
            SaiStatus::InvalidAttribute => "SAI_STATUS_INVALID_ATTRIBUTE",
        };
        write!(f, "{}", s)
    }
}

/// Error type for SAI operations.
#[derive(Debug, Clone, Error)]
pub enum SaiError {
    #[error("SAI operation failed: {status}")]
    Status { status: SaiStatus },

    #[error("Feature not supported: {feature}")]
    NotSupported { feature: String },

    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    #[error("Mandatory attribute missing: {attribute}")]
    MandatoryAttributeMissing { attribute: String },

    #[error("Item not found: {item}")]
    NotFound { item: String },

    #[error("Item already exists: {item}")]
    AlreadyExists { item: String },

    #[error("Table full: {table}")]
    TableFull { table: String },

    #[error("Object in use: {object}")]
    ObjectInUse { object: String },

    /// Objects created in the wrong order, e.g. an ACL entry on an unbound
    /// table.
    #[error("Failed precondition: {message}")]
    FailedPrecondition { message: String },

    #[error("SAI not initialized")]
    Uninitialized,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SaiError {
    /// Creates an error from a SAI status code.
    pub fn from_status(status: SaiStatus) -> Self {
        match status {
            SaiStatus::Success => SaiError::Internal {
                message: "from_status called with success status".to_string(),
            },
            SaiStatus::NotSupported | SaiStatus::NotImplemented => SaiError::NotSupported {
                feature: "unknown".to_string(),
            },
            SaiStatus::InvalidParameter
            | SaiStatus::InvalidPortNumber
            | SaiStatus::InvalidPortMember
            | SaiStatus::InvalidVlanId
            | SaiStatus::InvalidObjectType
            | SaiStatus::InvalidObjectId
            | SaiStatus::InvalidAttribute => SaiError::InvalidParameter {
                message: format!("SAI returned {}", status),
            },
            SaiStatus::MandatoryAttributeMissing => SaiError::MandatoryAttributeMissing {
                attribute: "unknown".to_string(),
            },
            SaiStatus::ItemNotFound | SaiStatus::AddrNotFound => SaiError::NotFound {
                item: "unknown".to_string(),
            },
            SaiStatus::ItemAlreadyExists => SaiError::AlreadyExists {
                item: "unknown".to_string(),
            },
            SaiStatus::TableFull => SaiError::TableFull {
                table: "unknown".to_string(),
            },
            SaiStatus::ObjectInUse => SaiError::ObjectInUse {
                object: "unknown".to_string(),
            },
            SaiStatus::Uninitialized => SaiError::Uninitialized,
            _ => SaiError::Status { status },
        }
    }

    pub fn not_supported(feature: impl Into<String>) -> Self {
        SaiError::NotSupported {
            feature: feature.into(),
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        SaiError::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn missing(attribute: impl Into<String>) -> Self {
        SaiError::MandatoryAttributeMissing {
            attribute: attribute.into(),
        }
    }

    pub fn not_found(item: impl Into<String>) -> Self {
        SaiError::NotFound { item: item.into() }
    }

    pub fn already_exists(item: impl Into<String>) -> Self {
        SaiError::AlreadyExists { item: item.into() }
    }

    pub fn object_in_use(object: impl Into<String>) -> Self {
        SaiError::ObjectInUse {
            object: object.into(),
        }
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        SaiError::FailedPrecondition {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        SaiError::Internal {
            message: message.into(),
        }
    }

    /// The SAI status this error reports as.
    pub fn status(&self) -> SaiStatus {
        match self {
            SaiError::Status { status } => *status,
            SaiError::NotSupported { .. } => SaiStatus::NotSupported,
            SaiError::InvalidParameter { .. } => SaiStatus::InvalidParameter,
            SaiError::MandatoryAttributeMissing { .. } => SaiStatus::MandatoryAttributeMissing,
            SaiError::NotFound { .. } => SaiStatus::ItemNotFound,
            SaiError::AlreadyExists { .. } => SaiStatus::ItemAlreadyExists,
            SaiError::TableFull { .. } => SaiStatus::TableFull,
            SaiError::ObjectInUse { .. } => SaiStatus::ObjectInUse,
            SaiError::FailedPrecondition { .. } => SaiStatus::Failure,
            SaiError::Uninitialized => SaiStatus::Uninitialized,
            SaiError::Internal { .. } => SaiStatus::Failure,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SaiError::NotFound { .. })
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SaiError::Status {
                status: SaiStatus::InsufficientResources | SaiStatus::NoMemory | SaiStatus::NotExecuted
            }
        )
    }
}

impl From<FwdError> for SaiError {
    fn from(e: FwdError) -> Self {
        match e {
            FwdError::InvalidArgument(m) | FwdError::Parse(m) => SaiError::InvalidParameter { message: m },
            FwdError::NotFound(m) => SaiError::NotFound { item: m },
            FwdError::FailedPrecondition(m) => SaiError::FailedPrecondition { message: m },
            FwdError::Unimplemented(m) => SaiError::NotSupported { feature: m },
            FwdError::Internal(m) => SaiError::Internal { message: m },
            FwdError::Io(e) => SaiError::Internal { message: e.to_string() },
        }
    }
}

/// Result type for SAI operations.
pub type SaiResult<T> = Result<T, SaiError>;
