//! Identifier types used throughout the SDK.
//!
//! Entity identifiers are assigned by the backend when an entity is first
//! created. A local entity has no identifier at all, so the SDK models the
//! "not yet persisted" case as `Option<EntityId>` rather than a placeholder.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Server-assigned identifier of a user, group, object or file.
///
/// Identifiers are opaque to the client. They are only checked for being
/// non-empty and free of characters that would break a REST path or a
/// `kiicloud://` URI.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Parses an identifier, rejecting empty strings and path separators.
    pub fn parse(s: &str) -> Result<Self, Error> {
        if s.is_empty() || s.chars().any(|c| c == '/' || c == '?' || c == '#' || c.is_whitespace())
        {
            return Err(Error::InvalidId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
