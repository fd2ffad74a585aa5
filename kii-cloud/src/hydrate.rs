//! Reading entity state out of server responses.

use serde_json::{Map, Value};

use kii_types::{is_reserved_key, EntityId, EntityKind, ServerTime};

const CREATED_KEYS: &[&str] = &["_created", "createdAt"];
const MODIFIED_KEYS: &[&str] = &["_modified", "modifiedAt"];

/// Server-assigned identity and timestamps found in a response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ServerMetadata {
    pub id: Option<EntityId>,
    pub created: Option<ServerTime>,
    pub modified: Option<ServerTime>,
}

impl ServerMetadata {
    pub(crate) fn parse(kind: EntityKind, body: &Value) -> Self {
        let id = kind
            .id_keys()
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .and_then(|s| EntityId::parse(s).ok());

        Self {
            id,
            created: first_time(body, CREATED_KEYS),
            modified: first_time(body, MODIFIED_KEYS),
        }
    }
}

fn first_time(body: &Value, keys: &[&str]) -> Option<ServerTime> {
    keys.iter()
        .find_map(|key| body.get(*key).and_then(ServerTime::from_json))
}

/// Fields of `body` that belong in an entity's field map: everything except
/// reserved keys, the kind's id keys, timestamps and `read_only` attributes.
pub(crate) fn writable_fields(kind: EntityKind, body: &Value, read_only: &[&str]) -> Map<String, Value> {
    let Some(object) = body.as_object() else {
        return Map::new();
    };
    object
        .iter()
        .filter(|(key, _)| {
            let key = key.as_str();
            !is_reserved_key(key)
                && !kind.id_keys().contains(&key)
                && !CREATED_KEYS.contains(&key)
                && !MODIFIED_KEYS.contains(&key)
                && !read_only.contains(&key)
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Reads a string attribute.
pub(crate) fn string_field(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Reads a boolean attribute.
pub(crate) fn bool_field(body: &Value, key: &str) -> Option<bool> {
    body.get(key).and_then(Value::as_bool)
}
