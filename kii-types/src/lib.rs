//! Core type definitions for the Kii Cloud SDK.
//!
//! This crate defines the leaf types every other SDK crate builds on:
//! - Server-assigned entity identifiers
//! - Server-authoritative timestamps
//! - Entity kinds and bucket scopes
//! - The `kiicloud://` object URI grammar
//! - Custom field key validation (reserved key rules)
//!
//! Nothing in here performs I/O.

mod ids;
mod keys;
mod kind;
mod timestamp;
mod uri;

pub use ids::EntityId;
pub use keys::{is_reserved_key, validate_custom_key, KeyError, RESERVED_KEYS};
pub use kind::{EntityKind, Scope};
pub use timestamp::ServerTime;
pub use uri::{validate_bucket_name, ObjectUri};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid entity id: {0:?}")]
    InvalidId(String),

    #[error("invalid bucket name: {0:?}")]
    InvalidBucketName(String),

    #[error("invalid object URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error(transparent)]
    InvalidKey(#[from] KeyError),
}
