use serde::{Deserialize, Serialize};
use std::fmt;

/// Standardized error codes for the kernel.
///
/// These map the taxonomy of kinds (`NotFound`, `Invalid`, `PermissionDenied`,
/// `Conflict`, `PolicyViolation`, `ApprovalRequired`, `IntegrityViolation`,
/// `Timeout`/`Cancelled`, `Internal`) onto stable numeric ranges so that
/// metrics and logs stay consistent across components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // General system errors (1000-1999)
    InternalServerError = 1000,
    ConfigurationError = 1001,
    ServiceUnavailable = 1002,
    Timeout = 1003,
    ResourceExhausted = 1004,
    Cancelled = 1005,

    // Storage & cryptography errors (2000-2999)
    StorageError = 2000,
    EncryptionError = 2001,
    DecryptionError = 2002,
    SerializationError = 2003,
    IntegrityViolation = 2004,

    // Network & communication errors (3000-3999)
    NetworkError = 3000,
    NetworkTimeout = 3001,
    NetworkConnectionRefused = 3002,
    ExternalServiceError = 3003,
    ChannelDisabled = 3004,

    // Security & authorization errors (4000-4999)
    AuthenticationRequired = 4000,
    AuthenticationFailed = 4001,
    AuthorizationFailed = 4002,
    PermissionDenied = 4003,
    SecurityPolicyViolation = 4004,

    // Input validation errors (5000-5999)
    ValidationFailed = 5000,
    InvalidInput = 5001,
    MissingRequiredField = 5002,
    InvalidFormat = 5003,
    ValueOutOfRange = 5004,
    DuplicateValue = 5005,

    // Resource management errors (6000-6999)
    ResourceNotFound = 6000,
    ResourceAlreadyExists = 6001,
    ResourceLocked = 6002,
    Conflict = 6003,
    NotImplemented = 6004,

    // Rate limiting & throttling errors (7000-7999)
    RateLimitExceeded = 7000,
    ConcurrencyLimitExceeded = 7001,

    // Governance & workflow errors (9000-9999)
    PolicyViolation = 9000,
    ApprovalRequired = 9001,
    WorkflowExecutionFailed = 9002,
    WorkflowTimeout = 9003,
}

impl ErrorCode {
    /// Get HTTP status code for this error, for components that surface one.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InternalServerError
            | ErrorCode::ConfigurationError
            | ErrorCode::StorageError
            | ErrorCode::EncryptionError
            | ErrorCode::DecryptionError
            | ErrorCode::SerializationError
            | ErrorCode::NetworkError
            | ErrorCode::ExternalServiceError
            | ErrorCode::WorkflowExecutionFailed => 500,

            ErrorCode::IntegrityViolation => 500,

            ErrorCode::ServiceUnavailable | ErrorCode::NetworkConnectionRefused => 503,

            ErrorCode::Timeout | ErrorCode::NetworkTimeout | ErrorCode::WorkflowTimeout => 408,

            ErrorCode::Cancelled => 499,

            ErrorCode::AuthenticationRequired | ErrorCode::AuthenticationFailed => 401,

            ErrorCode::AuthorizationFailed
            | ErrorCode::PermissionDenied
            | ErrorCode::SecurityPolicyViolation
            | ErrorCode::ChannelDisabled => 403,

            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::InvalidFormat
            | ErrorCode::ValueOutOfRange => 400,

            ErrorCode::ResourceNotFound => 404,

            ErrorCode::ResourceAlreadyExists | ErrorCode::DuplicateValue | ErrorCode::Conflict => {
                409
            }

            ErrorCode::ResourceLocked => 423,

            ErrorCode::RateLimitExceeded | ErrorCode::ConcurrencyLimitExceeded => 429,

            ErrorCode::ResourceExhausted => 507,

            ErrorCode::NotImplemented => 501,

            ErrorCode::PolicyViolation => 422,

            // Not a failure in the HTTP sense: the caller must act on the approval id.
            ErrorCode::ApprovalRequired => 202,
        }
    }

    /// Get error category for metrics and logging.
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::InternalServerError
            | ErrorCode::ConfigurationError
            | ErrorCode::ServiceUnavailable
            | ErrorCode::Timeout
            | ErrorCode::ResourceExhausted
            | ErrorCode::Cancelled => "system",

            ErrorCode::StorageError
            | ErrorCode::EncryptionError
            | ErrorCode::DecryptionError
            | ErrorCode::SerializationError
            | ErrorCode::IntegrityViolation => "storage",

            ErrorCode::NetworkError
            | ErrorCode::NetworkTimeout
            | ErrorCode::NetworkConnectionRefused
            | ErrorCode::ExternalServiceError
            | ErrorCode::ChannelDisabled => "network",

            ErrorCode::AuthenticationRequired
            | ErrorCode::AuthenticationFailed
            | ErrorCode::AuthorizationFailed
            | ErrorCode::PermissionDenied
            | ErrorCode::SecurityPolicyViolation => "security",

            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::InvalidFormat
            | ErrorCode::ValueOutOfRange
            | ErrorCode::DuplicateValue => "validation",

            ErrorCode::ResourceNotFound
            | ErrorCode::ResourceAlreadyExists
            | ErrorCode::ResourceLocked
            | ErrorCode::Conflict
            | ErrorCode::NotImplemented => "resource",

            ErrorCode::RateLimitExceeded | ErrorCode::ConcurrencyLimitExceeded => "rate_limit",

            ErrorCode::PolicyViolation
            | ErrorCode::ApprovalRequired
            | ErrorCode::WorkflowExecutionFailed
            | ErrorCode::WorkflowTimeout => "governance",
        }
    }

    /// Check if the underlying operation should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkTimeout
                | ErrorCode::NetworkConnectionRefused
                | ErrorCode::ServiceUnavailable
                | ErrorCode::ResourceExhausted
                | ErrorCode::WorkflowTimeout
                | ErrorCode::ExternalServiceError
        )
    }

    /// Check if error should be logged at error level.
    pub fn should_log_as_error(&self) -> bool {
        !matches!(
            self,
            ErrorCode::ValidationFailed
                | ErrorCode::InvalidInput
                | ErrorCode::MissingRequiredField
                | ErrorCode::InvalidFormat
                | ErrorCode::ValueOutOfRange
                | ErrorCode::ResourceNotFound
                | ErrorCode::PermissionDenied
                | ErrorCode::RateLimitExceeded
                | ErrorCode::PolicyViolation
                | ErrorCode::ApprovalRequired
                | ErrorCode::Conflict
        )
    }

    /// Only `IntegrityViolation` halts the system per the kernel's error model;
    /// every other kind leaves the caller with a well-defined, recoverable state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorCode::IntegrityViolation)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
