//! Result envelope shared by every controller and orchestrator operation.
//!
//! Operations return [`PolicyResult`]; the calling layer turns that into an
//! [`Envelope`] (`{success, error, payload}`) for the wire. Because the
//! envelope is built from a `Result`, a failed envelope always carries an
//! error and a successful one never does.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Closed set of error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InsufficientPrivileges,
    RegistryAccessDenied,
    RegistryError,
    OperationFailed,
    InvalidDomainFormat,
    InvalidSettings,
    InvalidPolicyType,
    StatusRetrievalError,
    SyncError,
    PartialResetFailure,
    PolicyApplicationError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientPrivileges => "INSUFFICIENT_PRIVILEGES",
            Self::RegistryAccessDenied => "REGISTRY_ACCESS_DENIED",
            Self::RegistryError => "REGISTRY_ERROR",
            Self::OperationFailed => "OPERATION_FAILED",
            Self::InvalidDomainFormat => "INVALID_DOMAIN_FORMAT",
            Self::InvalidSettings => "INVALID_SETTINGS",
            Self::InvalidPolicyType => "INVALID_POLICY_TYPE",
            Self::StatusRetrievalError => "STATUS_RETRIEVAL_ERROR",
            Self::SyncError => "SYNC_ERROR",
            Self::PartialResetFailure => "PARTIAL_RESET_FAILURE",
            Self::PolicyApplicationError => "POLICY_APPLICATION_ERROR",
        }
    }

    /// Whether failures with this code are retry-eligible by default.
    ///
    /// Malformed input is never recoverable; the caller has to fix and
    /// resubmit.
    pub fn default_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidDomainFormat | Self::InvalidSettings | Self::InvalidPolicyType
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure carried by every unsuccessful operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct PolicyError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub recoverable: bool,
}

impl PolicyError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            recoverable: code.default_recoverable(),
        }
    }

    pub fn with_details(mut self, details: impl Into<Value>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn insufficient_privileges(operation: &str) -> Self {
        Self::new(
            ErrorCode::InsufficientPrivileges,
            "Administrator privileges are required. Restart the application as an administrator and try again.",
        )
        .with_details(format!("operation '{operation}' requires elevation"))
        .recoverable(true)
    }

    pub fn invalid_settings(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSettings, message)
    }
}

pub type PolicyResult<T> = Result<T, PolicyError>;

/// Wire form of a [`PolicyResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub error: Option<PolicyError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn from_result<T: Serialize>(result: PolicyResult<T>) -> Self {
        match result {
            Ok(payload) => match serde_json::to_value(payload) {
                Ok(Value::Null) => Self {
                    success: true,
                    error: None,
                    payload: None,
                },
                Ok(value) => Self {
                    success: true,
                    error: None,
                    payload: Some(value),
                },
                Err(err) => Self::failure(
                    PolicyError::new(
                        ErrorCode::PolicyApplicationError,
                        "Failed to encode operation payload",
                    )
                    .with_details(err.to_string())
                    .recoverable(false),
                ),
            },
            Err(error) => Self::failure(error),
        }
    }

    pub fn failure(error: PolicyError) -> Self {
        Self {
            success: false,
            error: Some(error),
            payload: None,
        }
    }

    /// Recover the `Result` view; used by callers that consume envelopes.
    pub fn into_result(self) -> PolicyResult<Option<Value>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.payload),
        }
    }
}
