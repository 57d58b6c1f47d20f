//! Error types for the reconciliation layer.
//!
//! Every reconciler operation returns `Result<T, Error>`. The variants mirror
//! the failure kinds a caller needs to tell apart; `NotFoundAfterOp` is the
//! in-band retry signal consumed by the read-after-write kernel and never
//! escapes a successful intent.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using the reconciliation `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed underlying cause carried by transport errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Reconciliation error.
#[derive(Debug, Error)]
pub enum Error {
    /// Login or refresh failed, or a token could not be recovered.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The desired state violates a static invariant.
    #[error("Validation error at `{path}`: {message}")]
    Validation { path: String, message: String },

    /// Network failure or a non-2xx response not classified elsewhere.
    #[error("Platform request failed{}: {message}", status_suffix(.status))]
    Transport {
        status: Option<u16>,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The platform returned no rows where one was expected.
    #[error("{kind} {id} not found")]
    NotFound { kind: String, id: String },

    /// Retry signal: the entity is not yet visible after a create or update.
    #[error("{kind} {id} not yet visible after create or update")]
    NotFoundAfterOp { kind: String, id: String },

    /// A poll observed a state outside the allowed and target sets.
    #[error("{what} reached unexpected state `{state}` (expected one of: {})", .expected.join(", "))]
    UnexpectedState {
        what: String,
        state: String,
        expected: Vec<String>,
    },

    /// A retry or wait budget elapsed.
    #[error("Timed out after {}s waiting for {what}", .after.as_secs())]
    Timeout { what: String, after: Duration },

    /// A composite identifier failed to parse.
    #[error("Malformed id `{id}`: {reason}")]
    MalformedId { id: String, reason: String },

    /// A locked entity could not be unlocked for mutation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The platform answered with a shape that breaks a uniqueness assumption.
    #[error("Inconsistent platform response: {0}")]
    Inconsistent(String),

    /// The operation observed its cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Coarse classification of an [`Error`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    Validation,
    Transport,
    NotFound,
    NotFoundAfterOp,
    UnexpectedState,
    Timeout,
    MalformedId,
    Conflict,
    Inconsistent,
    Cancelled,
    Config,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "AuthError",
            Self::Validation => "ValidationError",
            Self::Transport => "TransportError",
            Self::NotFound => "NotFound",
            Self::NotFoundAfterOp => "NotFoundAfterOp",
            Self::UnexpectedState => "UnexpectedState",
            Self::Timeout => "Timeout",
            Self::MalformedId => "MalformedId",
            Self::Conflict => "ConflictError",
            Self::Inconsistent => "InconsistentResponse",
            Self::Cancelled => "Cancelled",
            Self::Config => "ConfigError",
            Self::Internal => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Build a validation error for the attribute at `path`.
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Build a transport error without an underlying cause.
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transport {
            status,
            message: message.into(),
            source: None,
        }
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn not_found_after_op(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFoundAfterOp {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn malformed_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::Auth,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NotFoundAfterOp { .. } => ErrorKind::NotFoundAfterOp,
            Self::UnexpectedState { .. } => ErrorKind::UnexpectedState,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::MalformedId { .. } => ErrorKind::MalformedId,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Inconsistent(_) => ErrorKind::Inconsistent,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            Self::Json(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// HTTP status of a transport error, if the platform answered at all.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Process exit code when the error terminates a CLI invocation.
    ///
    /// `1` caller error, `2` platform error, `3` auth error, `4` timeout.
    pub const fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::MalformedId | ErrorKind::Config => 1,
            ErrorKind::Auth => 3,
            ErrorKind::Timeout | ErrorKind::Cancelled => 4,
            ErrorKind::Transport
            | ErrorKind::NotFound
            | ErrorKind::NotFoundAfterOp
            | ErrorKind::UnexpectedState
            | ErrorKind::Conflict
            | ErrorKind::Inconsistent
            | ErrorKind::Internal => 2,
        }
    }
}
