use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// ErrorClass
// ---------------------------------------------------------------------------

/// Stable error class used by `Retry` and `Catch` matching.
///
/// Serialized as its canonical name. Parsing accepts the canonical names plus
/// the aliases emitted by common task runtimes (e.g. the Lambda throttling
/// exception). Any other name becomes a [`ErrorClass::Custom`] class, which is
/// how errors raised by `Fail` states travel out of branches and items.
///
/// The class is only a matching key. The name an error was raised with is
/// kept on [`ClassifiedError::name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorClass {
    /// Wildcard matcher (`States.ALL`).
    All,
    /// The callee rejected the call because of rate limits.
    Throttling,
    /// A transient fault on the callee side; usually safe to retry.
    TransientService,
    /// The callee rejected the payload.
    InvalidInput,
    /// The invocation did not finish within its timeout.
    Timeout,
    /// Unclassified failure.
    Unknown,
    /// User-defined error name.
    Custom(String),
}

impl ErrorClass {
    pub const ALL: &'static str = "States.ALL";
    pub const THROTTLING: &'static str = "ThrottlingError";
    pub const TRANSIENT_SERVICE: &'static str = "TransientServiceError";
    pub const INVALID_INPUT: &'static str = "InvalidInput";
    pub const TIMEOUT: &'static str = "States.Timeout";
    pub const UNKNOWN: &'static str = "Unknown";

    /// Canonical name of this class.
    pub fn as_str(&self) -> &str {
        match self {
            ErrorClass::All => Self::ALL,
            ErrorClass::Throttling => Self::THROTTLING,
            ErrorClass::TransientService => Self::TRANSIENT_SERVICE,
            ErrorClass::InvalidInput => Self::INVALID_INPUT,
            ErrorClass::Timeout => Self::TIMEOUT,
            ErrorClass::Unknown => Self::UNKNOWN,
            ErrorClass::Custom(name) => name,
        }
    }

    /// Whether this class, used as a matcher, accepts `error`.
    pub fn matches(&self, error: &ErrorClass) -> bool {
        matches!(self, ErrorClass::All) || self == error
    }

    /// Whether any matcher in `matchers` accepts `error`.
    pub fn any_matches(matchers: &[ErrorClass], error: &ErrorClass) -> bool {
        matchers.iter().any(|m| m.matches(error))
    }
}

impl From<String> for ErrorClass {
    fn from(name: String) -> Self {
        match name.as_str() {
            "States.ALL" | "ALL" => ErrorClass::All,
            "ThrottlingError" | "States.Throttling" | "Lambda.TooManyRequestsException" => {
                ErrorClass::Throttling
            }
            "TransientServiceError" | "Lambda.ServiceException" | "Lambda.SdkClientException" => {
                ErrorClass::TransientService
            }
            "InvalidInput" => ErrorClass::InvalidInput,
            "States.Timeout" | "TaskTimeout" => ErrorClass::Timeout,
            "Unknown" => ErrorClass::Unknown,
            _ => ErrorClass::Custom(name),
        }
    }
}

impl From<&str> for ErrorClass {
    fn from(name: &str) -> Self {
        ErrorClass::from(name.to_string())
    }
}

impl From<ErrorClass> for String {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ClassifiedError
// ---------------------------------------------------------------------------

/// An error tagged with a stable class, as returned by task invocations and
/// raised by `Fail` states inside nested graphs.
///
/// `Retry` and `Catch` match on `class`; callers, traces and
/// `$states.errorOutput` see `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{name}: {cause}")]
pub struct ClassifiedError {
    pub class: ErrorClass,
    pub name: String,
    pub cause: String,
}

impl ClassifiedError {
    pub fn new(class: ErrorClass, cause: impl Into<String>) -> Self {
        Self {
            name: class.as_str().to_string(),
            class,
            cause: cause.into(),
        }
    }

    /// An error raised under `name`, which may be an alias of a known class.
    pub fn named(name: impl Into<String>, cause: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            class: ErrorClass::from(name.as_str()),
            name,
            cause: cause.into(),
        }
    }

    pub fn throttling(cause: impl Into<String>) -> Self {
        Self::new(ErrorClass::Throttling, cause)
    }

    pub fn transient(cause: impl Into<String>) -> Self {
        Self::new(ErrorClass::TransientService, cause)
    }

    pub fn invalid_input(cause: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvalidInput, cause)
    }

    pub fn timeout(cause: impl Into<String>) -> Self {
        Self::new(ErrorClass::Timeout, cause)
    }

    pub fn unknown(cause: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unknown, cause)
    }

    /// The error payload exposed to `Catch` transforms as `$states.errorOutput`.
    pub fn to_payload(&self) -> Value {
        json!({
            "Error": self.name,
            "Cause": self.cause,
        })
    }
}

// ---------------------------------------------------------------------------
// RepositoryError
// ---------------------------------------------------------------------------

/// Errors from execution persistence backends.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}
