//! Error types for the SDK.

use thiserror::Error;

use crate::acl::AclEntry;
use crate::file::TrashState;

/// Result type for SDK operations.
pub type KiiResult<T> = Result<T, KiiError>;

/// Failures reported by the transport collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never produced an HTTP response (DNS, TLS, connection, I/O).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("server returned {status}: {message}")]
    Status {
        status: u16,
        error_code: Option<String>,
        message: String,
        /// Parsed error body, when it was JSON.
        details: Option<serde_json::Value>,
    },
}

impl TransportError {
    /// HTTP status, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            TransportError::Http(e) => e.status().map(|s| s.as_u16()),
        }
    }

    /// Backend error code (e.g. `OBJECT_NOT_FOUND`), when supplied.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            TransportError::Status { error_code, .. } => error_code.as_deref(),
            TransportError::Http(_) => None,
        }
    }
}

/// Errors that can occur in SDK operations.
#[derive(Debug, Error)]
pub enum KiiError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("field {key:?} has an unsupported value: {reason}")]
    InvalidFieldType { key: String, reason: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("cannot {operation} a file that is {state}")]
    InvalidState {
        operation: &'static str,
        state: TrashState,
    },

    #[error("entity has been deleted: {0}")]
    StaleEntity(String),

    #[error("file has no stored body: {0}")]
    NoBody(String),

    #[error("file {file_id} was created but its body upload failed: {source}")]
    PartialFailure {
        file_id: String,
        #[source]
        source: Box<KiiError>,
    },

    #[error("ACL update rejected{}: {source}", .entry.as_ref().map(|e| format!(" at {e}")).unwrap_or_default())]
    AclRejected {
        entry: Option<AclEntry>,
        #[source]
        source: TransportError,
    },

    #[error("unexpected response: {0}")]
    MalformedResponse(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl KiiError {
    /// Returns true for errors detected locally from bad input
    /// (reserved keys, malformed values, invalid queries).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            KiiError::Validation(_) | KiiError::InvalidFieldType { .. } | KiiError::InvalidQuery(_)
        )
    }

    /// Returns true for errors that only a network round trip can produce.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            KiiError::Transport(_)
                | KiiError::AclRejected { .. }
                | KiiError::PartialFailure { .. }
                | KiiError::MalformedResponse(_)
        )
    }

    /// HTTP status carried by a transport failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            KiiError::Transport(e) | KiiError::AclRejected { source: e, .. } => e.status(),
            KiiError::PartialFailure { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Returns true if the server reported the target as missing.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl From<kii_types::Error> for KiiError {
    fn from(e: kii_types::Error) -> Self {
        KiiError::Validation(e.to_string())
    }
}

impl From<kii_query::QueryError> for KiiError {
    fn from(e: kii_query::QueryError) -> Self {
        KiiError::InvalidQuery(e.to_string())
    }
}
