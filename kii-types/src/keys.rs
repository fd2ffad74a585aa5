//! Custom field key rules.
//!
//! Entities carry arbitrary custom fields, but a handful of keys belong to
//! the backend: the server-managed metadata keys and anything starting with
//! an underscore. Setting one of those from the client is always rejected.

use thiserror::Error;

/// Metadata keys owned by the backend.
pub const RESERVED_KEYS: &[&str] = &["created", "modified", "type", "uuid"];

/// Maximum accepted length of a custom key, in bytes.
const MAX_KEY_LEN: usize = 250;

/// Why a custom key was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("field key must not be empty")]
    Empty,

    #[error("field key {0:?} is reserved by the server")]
    Reserved(String),

    #[error("field key {0:?} is longer than 250 bytes")]
    TooLong(String),

    #[error("field key {0:?} contains control characters")]
    ControlCharacter(String),
}

/// Returns true if `key` is owned by the backend.
#[must_use]
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with('_') || RESERVED_KEYS.contains(&key)
}

/// Checks that `key` may be set by the client as a custom field.
pub fn validate_custom_key(key: &str) -> Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }
    if is_reserved_key(key) {
        return Err(KeyError::Reserved(key.to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(KeyError::TooLong(key.to_string()));
    }
    if key.chars().any(char::is_control) {
        return Err(KeyError::ControlCharacter(key.to_string()));
    }
    Ok(())
}
