use crate::db::{query::CompileError, registry::RegistryError, relation::IntegrityViolation};
use std::fmt;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured runtime error with a stable classification.
/// Every fallible operation in this crate returns this type; the typed
/// payload (if any) lives in `detail` and always matches `origin`.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,

    /// Optional structured error detail.
    pub detail: Option<ErrorDetail>,
}

impl InternalError {
    /// Construct an InternalError without structured detail.
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    /// Construct an adapter-origin failure wrapping the engine's own error.
    pub fn adapter(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        let message = err.to_string();

        Self {
            class: ErrorClass::Internal,
            origin: ErrorOrigin::Adapter,
            message: format!("adapter error: {message}"),
            detail: Some(ErrorDetail::Adapter(AdapterError {
                message,
                source: Box::new(err),
            })),
        }
    }

    /// Construct a corruption error for a stored payload that failed to decode.
    pub(crate) fn payload_corruption(table: &str, id: i64, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorClass::Corruption,
            ErrorOrigin::Serialize,
            format!("stored payload is not valid JSON: table={table} id={id} ({err})"),
        )
    }

    /// Construct a serialize-origin internal error.
    pub(crate) fn serialize_internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, ErrorOrigin::Serialize, message)
    }

    /// Construct a row-not-found error.
    pub fn row_not_found(origin: ErrorOrigin, table: &str, id: i64) -> Self {
        Self {
            class: ErrorClass::NotFound,
            origin,
            message: format!("row not found: table={table} id={id}"),
            detail: Some(ErrorDetail::NotFound {
                table: table.to_string(),
                id,
            }),
        }
    }

    /// Construct the stale-version conflict raised by compare-and-increment updates.
    pub(crate) fn stale_version(table: &str, id: i64, observed: i64, stored: i64) -> Self {
        Self {
            class: ErrorClass::Conflict,
            origin: ErrorOrigin::Version,
            message: format!(
                "stale version: table={table} id={id} observed={observed} stored={stored}"
            ),
            detail: Some(ErrorDetail::StaleVersion {
                table: table.to_string(),
                id,
                observed,
                stored,
            }),
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.detail, Some(ErrorDetail::NotFound { .. }))
    }

    #[must_use]
    pub const fn is_compile_error(&self) -> bool {
        matches!(self.detail, Some(ErrorDetail::Compile(_)))
    }

    #[must_use]
    pub const fn is_integrity_violation(&self) -> bool {
        matches!(self.detail, Some(ErrorDetail::Integrity(_)))
    }

    #[must_use]
    pub const fn is_stale_version(&self) -> bool {
        matches!(self.detail, Some(ErrorDetail::StaleVersion { .. }))
    }

    #[must_use]
    pub const fn is_adapter_error(&self) -> bool {
        matches!(self.origin, ErrorOrigin::Adapter)
    }

    /// Borrow the compile error, if this is one.
    #[must_use]
    pub const fn as_compile_error(&self) -> Option<&CompileError> {
        match &self.detail {
            Some(ErrorDetail::Compile(err)) => Some(err),
            _ => None,
        }
    }

    /// Borrow the integrity violation, if this is one.
    #[must_use]
    pub const fn as_integrity_violation(&self) -> Option<&IntegrityViolation> {
        match &self.detail {
            Some(ErrorDetail::Integrity(violation)) => Some(violation),
            _ => None,
        }
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

impl From<CompileError> for InternalError {
    fn from(err: CompileError) -> Self {
        Self {
            class: ErrorClass::Unsupported,
            origin: ErrorOrigin::Query,
            message: err.to_string(),
            detail: Some(ErrorDetail::Compile(err)),
        }
    }
}

impl From<RegistryError> for InternalError {
    fn from(err: RegistryError) -> Self {
        Self {
            class: err.class(),
            origin: ErrorOrigin::Registry,
            message: err.to_string(),
            detail: Some(ErrorDetail::Registry(err)),
        }
    }
}

impl From<IntegrityViolation> for InternalError {
    fn from(violation: IntegrityViolation) -> Self {
        Self {
            class: ErrorClass::Conflict,
            origin: ErrorOrigin::Relation,
            message: violation.to_string(),
            detail: Some(ErrorDetail::Integrity(violation)),
        }
    }
}

impl From<serde_json::Error> for InternalError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialize_internal(format!("json encode failed: {err}"))
    }
}

///
/// ErrorDetail
///
/// Structured, origin-specific error detail carried by [`InternalError`].
///

#[derive(Debug, ThisError)]
pub enum ErrorDetail {
    #[error("{0}")]
    Compile(CompileError),

    #[error("{0}")]
    Registry(RegistryError),

    #[error("{0}")]
    Integrity(IntegrityViolation),

    #[error("stale version for {table}#{id}: observed {observed}, stored {stored}")]
    StaleVersion {
        table: String,
        id: i64,
        observed: i64,
        stored: i64,
    },

    #[error("row not found: {table}#{id}")]
    NotFound { table: String, id: i64 },

    #[error("{0}")]
    Adapter(AdapterError),
}

///
/// AdapterError
///
/// Storage engine failure, propagated without reinterpretation.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct AdapterError {
    pub message: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

///
/// ErrorClass
/// Error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Corruption,
    NotFound,
    Internal,
    Conflict,
    Unsupported,
    InvariantViolation,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Corruption => "corruption",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
            Self::Conflict => "conflict",
            Self::Unsupported => "unsupported",
            Self::InvariantViolation => "invariant_violation",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Origin taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Query,
    Registry,
    Relation,
    Version,
    Adapter,
    Serialize,
    Config,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Query => "query",
            Self::Registry => "registry",
            Self::Relation => "relation",
            Self::Version => "version",
            Self::Adapter => "adapter",
            Self::Serialize => "serialize",
            Self::Config => "config",
        };
        write!(f, "{label}")
    }
}
