//! Entity kinds and bucket scopes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::EntityId;

/// The kind of a syncable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Group,
    Object,
    File,
}

impl EntityKind {
    /// Lowercase name, as used in logs and `describe()` output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Group => "group",
            EntityKind::Object => "object",
            EntityKind::File => "file",
        }
    }

    /// JSON keys under which the backend reports this kind's identifier,
    /// in order of preference.
    #[must_use]
    pub const fn id_keys(&self) -> &'static [&'static str] {
        match self {
            EntityKind::User => &["userID"],
            EntityKind::Group => &["groupID"],
            EntityKind::Object => &["_id", "objectID"],
            EntityKind::File => &["_id", "fileID"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of a bucket: the application itself, a user, or a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    App,
    User(EntityId),
    Group(EntityId),
}

impl Scope {
    /// REST path prefix for resources in this scope, e.g.
    /// `/apps/{app}/users/{id}`.
    #[must_use]
    pub fn path_prefix(&self, app_id: &str) -> String {
        match self {
            Scope::App => format!("/apps/{app_id}"),
            Scope::User(id) => format!("/apps/{app_id}/users/{id}"),
            Scope::Group(id) => format!("/apps/{app_id}/groups/{id}"),
        }
    }

    /// `kiicloud://` URI prefix for resources in this scope. Empty for the
    /// application scope, otherwise ends with a `/`.
    #[must_use]
    pub fn uri_prefix(&self) -> String {
        match self {
            Scope::App => String::new(),
            Scope::User(id) => format!("users/{id}/"),
            Scope::Group(id) => format!("groups/{id}/"),
        }
    }
}
