//! Error types for the repository layer.
//!
//! This module defines all error types used throughout the repository layer,
//! following a hierarchy that separates argument errors, resource state errors,
//! identity tracking errors, validation errors, unit-of-work errors and errors
//! raised by the storage backends themselves.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// The primary error type for all repository operations.
///
/// This enum encompasses all possible errors that can occur during repository
/// operations, organized by category.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Null or malformed input; no backend call was made.
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    /// Resource state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Identity tracking errors that could not be recovered
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The cancellation signal was observed before or between backend calls.
    #[error("operation cancelled")]
    Cancelled,

    /// Unit of work errors
    #[error(transparent)]
    UnitOfWork(#[from] UnitOfWorkError),

    /// Registry configuration errors
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl RepositoryError {
    /// Returns true if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::Resource(ResourceError::NotFound { .. }))
    }

    /// Returns true if this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RepositoryError::Cancelled)
    }

    /// Returns true if this error reports an operation on a finished unit of work or scope.
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            RepositoryError::UnitOfWork(UnitOfWorkError::InvalidState { .. })
                | RepositoryError::UnitOfWork(UnitOfWorkError::ScopeClosed)
        )
    }
}

/// Errors caused by null or malformed caller input.
#[derive(Error, Debug)]
pub enum ArgumentError {
    /// The aggregate has no key where one is required.
    #[error("{aggregate_type} has no key")]
    MissingKey { aggregate_type: String },

    /// The aggregate did not serialize to a JSON object.
    #[error("{aggregate_type} must serialize to an object, got {found}")]
    NotAnObject {
        aggregate_type: String,
        found: String,
    },

    /// An explicitly named property does not exist on the aggregate.
    #[error("unknown property '{property}' on {aggregate_type}")]
    UnknownProperty {
        aggregate_type: String,
        property: String,
    },

    /// A property path or field name was empty.
    #[error("empty property name in {context}")]
    EmptyProperty { context: String },

    /// An explicit update was requested with an empty property list.
    #[error("explicit update of {aggregate_type} names no properties")]
    NoProperties { aggregate_type: String },

    /// The key property cannot be written by an update.
    #[error("key property '{property}' of {aggregate_type} cannot be updated")]
    KeyProperty {
        aggregate_type: String,
        property: String,
    },
}

/// Errors related to the durable state of an aggregate.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The requested aggregate was not found.
    #[error("aggregate not found: {aggregate_type}/{key}")]
    NotFound { aggregate_type: String, key: String },

    /// An aggregate with the given key already exists.
    #[error("aggregate already exists: {aggregate_type}/{key}")]
    AlreadyExists { aggregate_type: String, key: String },

    /// The backend could not produce an identity the key type accepts.
    #[error("cannot generate a key for {aggregate_type}")]
    KeyGeneration { aggregate_type: String },
}

/// Errors raised by identity tracking.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// A second instance was registered under a key that is already tracked.
    #[error("identity conflict: {aggregate_type}/{key} is already tracked")]
    Conflict { aggregate_type: String, key: String },

    /// The tracked entry is in a state that does not allow the requested change.
    #[error("inconsistent tracking state for {aggregate_type}/{key}: {message}")]
    Inconsistent {
        aggregate_type: String,
        key: String,
        message: String,
    },

    /// The requested entry is not tracked.
    #[error("{aggregate_type}/{key} is not tracked")]
    NotTracked { aggregate_type: String, key: String },
}

/// Errors related to aggregate validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The aggregate failed validation.
    #[error("invalid {aggregate_type} {key}: {message}")]
    InvalidAggregate {
        aggregate_type: String,
        key: String,
        message: String,
        details: Vec<ValidationDetail>,
    },

    /// The staged payload could not be read back as the aggregate type.
    #[error("cannot validate {aggregate_type}: {message}")]
    Unreadable {
        aggregate_type: String,
        message: String,
    },
}

/// Detailed validation error information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationDetail {
    /// The property that failed.
    pub property: String,
    /// A human-readable error message.
    pub message: String,
    /// The severity of the finding.
    pub severity: ValidationSeverity,
}

impl ValidationDetail {
    /// Creates an error-level detail.
    pub fn error(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            message: message.into(),
            severity: ValidationSeverity::Error,
        }
    }

    /// Creates a warning-level detail.
    pub fn warning(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            message: message.into(),
            severity: ValidationSeverity::Warning,
        }
    }
}

/// Severity level for validation findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Fatal error - the commit cannot proceed.
    Error,
    /// Warning - the commit can proceed.
    Warning,
}

impl fmt::Display for ValidationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationSeverity::Error => write!(f, "error"),
            ValidationSeverity::Warning => write!(f, "warning"),
        }
    }
}

/// Errors related to the unit of work.
#[derive(Error, Debug)]
pub enum UnitOfWorkError {
    /// The unit of work is no longer accepting operations.
    #[error("unit of work '{name}' is {state}")]
    InvalidState { name: String, state: String },

    /// The scope owning the unit of work has been torn down.
    #[error("repository scope has been closed")]
    ScopeClosed,

    /// A non-atomic commit failed after some operations were durably applied.
    #[error("commit partially applied: {applied} of {total} operations durable before failure: {source}")]
    PartialFailure {
        applied: usize,
        total: usize,
        #[source]
        source: Box<RepositoryError>,
    },
}

/// Errors in the registry configuration. These are fatal and never retried.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// No repository is registered for the aggregate type.
    #[error("no repository registered for aggregate type '{aggregate_type}'")]
    UnmappedAggregate { aggregate_type: String },

    /// The repository name is not registered.
    #[error("unknown repository '{name}'")]
    UnknownRepository { name: String },

    /// The repository name was registered twice.
    #[error("repository '{name}' is registered more than once")]
    DuplicateRepository { name: String },

    /// An aggregate type was mapped to two repositories.
    #[error("aggregate type '{aggregate_type}' is mapped to both '{first}' and '{second}'")]
    AmbiguousAggregate {
        aggregate_type: String,
        first: String,
        second: String,
    },

    /// A repository name is empty or blank.
    #[error("repository name must not be blank")]
    BlankName,

    /// A backend setting could not be parsed.
    #[error("invalid setting '{key}' for repository '{name}': {message}")]
    InvalidSetting {
        name: String,
        key: String,
        message: String,
    },

    /// The configured backend kind is not available in this build.
    #[error("backend '{backend}' is not available")]
    UnsupportedBackend { backend: String },

    /// The configuration document could not be read.
    #[error("cannot read registry configuration: {message}")]
    Unreadable { message: String },
}

/// Errors originating from the storage backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend is currently unavailable.
    #[error("backend unavailable: {backend_name}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// Schema migration error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryError { message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Result type alias for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

// Implement conversions from common error types

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Internal {
            backend_name: "unknown".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        RepositoryError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for RepositoryError {
    fn from(_err: r2d2::Error) -> Self {
        RepositoryError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}
