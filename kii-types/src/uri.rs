//! `kiicloud://` object URIs.
//!
//! Every persisted entity has a URI derived from its kind, its scope and its
//! server id. URIs are how an application stores a reference to an entity and
//! later re-creates a handle for it without a query.

use std::fmt;
use std::str::FromStr;

use crate::{EntityId, Error, Scope};

const SCHEME: &str = "kiicloud://";

/// A parsed `kiicloud://` URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectUri {
    /// `kiicloud://users/{id}`
    User(EntityId),
    /// `kiicloud://groups/{id}`
    Group(EntityId),
    /// `kiicloud://[scope/]buckets/{bucket}/objects/{id}`
    Object {
        scope: Scope,
        bucket: String,
        id: EntityId,
    },
    /// `kiicloud://[scope/]filebuckets/{bucket}/files/{id}`
    File {
        scope: Scope,
        bucket: String,
        id: EntityId,
    },
}

impl ObjectUri {
    /// Parses a URI string.
    pub fn parse(uri: &str) -> Result<Self, Error> {
        let invalid = |reason: &str| Error::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let rest = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| invalid("missing kiicloud:// scheme"))?;
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("empty path segment"));
        }

        let id_at = |i: usize| EntityId::parse(segments[i]).map_err(|_| invalid("bad id"));

        match segments.as_slice() {
            ["users", _] => return Ok(ObjectUri::User(id_at(1)?)),
            ["groups", _] => return Ok(ObjectUri::Group(id_at(1)?)),
            _ => {}
        }

        let (scope, offset) = match segments.first() {
            Some(&"users") if segments.len() > 2 => (Scope::User(id_at(1)?), 2),
            Some(&"groups") if segments.len() > 2 => (Scope::Group(id_at(1)?), 2),
            _ => (Scope::App, 0),
        };

        match &segments[offset..] {
            ["buckets", bucket, "objects", _] => {
                validate_bucket_name(bucket)?;
                Ok(ObjectUri::Object {
                    scope,
                    bucket: (*bucket).to_string(),
                    id: id_at(offset + 3)?,
                })
            }
            ["filebuckets", bucket, "files", _] => {
                validate_bucket_name(bucket)?;
                Ok(ObjectUri::File {
                    scope,
                    bucket: (*bucket).to_string(),
                    id: id_at(offset + 3)?,
                })
            }
            _ => Err(invalid("unrecognised resource path")),
        }
    }

    /// The id of the entity the URI points at.
    #[must_use]
    pub fn id(&self) -> &EntityId {
        match self {
            ObjectUri::User(id) | ObjectUri::Group(id) => id,
            ObjectUri::Object { id, .. } | ObjectUri::File { id, .. } => id,
        }
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectUri::User(id) => write!(f, "{SCHEME}users/{id}"),
            ObjectUri::Group(id) => write!(f, "{SCHEME}groups/{id}"),
            ObjectUri::Object { scope, bucket, id } => {
                write!(f, "{SCHEME}{}buckets/{bucket}/objects/{id}", scope.uri_prefix())
            }
            ObjectUri::File { scope, bucket, id } => {
                write!(f, "{SCHEME}{}filebuckets/{bucket}/files/{id}", scope.uri_prefix())
            }
        }
    }
}

impl FromStr for ObjectUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Checks a bucket name: 2 to 64 characters of `[A-Za-z0-9_-]`.
pub fn validate_bucket_name(name: &str) -> Result<(), Error> {
    let valid_len = (2..=64).contains(&name.len());
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid_len && valid_chars {
        Ok(())
    } else {
        Err(Error::InvalidBucketName(name.to_string()))
    }
}
