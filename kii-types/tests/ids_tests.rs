use kii_types::EntityId;
use std::collections::HashSet;
use std::str::FromStr;

// ── Parsing ──────────────────────────────────────────────────────

#[test]
fn parse_accepts_opaque_server_id() {
    let id = EntityId::parse("a1b2c3d4-e5f6").unwrap();
    assert_eq!(id.as_str(), "a1b2c3d4-e5f6");
}

#[test]
fn parse_rejects_empty() {
    assert!(EntityId::parse("").is_err());
}

#[test]
fn parse_rejects_path_separators() {
    assert!(EntityId::parse("a/b").is_err());
    assert!(EntityId::parse("a?b").is_err());
    assert!(EntityId::parse("a#b").is_err());
    assert!(EntityId::parse("a b").is_err());
}

#[test]
fn from_str_matches_parse() {
    let id = EntityId::from_str("xyz").unwrap();
    assert_eq!(id, EntityId::parse("xyz").unwrap());
}

// ── Display & serde ──────────────────────────────────────────────

#[test]
fn display_is_raw_id() {
    let id = EntityId::parse("user-42").unwrap();
    assert_eq!(format!("{id}"), "user-42");
}

#[test]
fn serializes_as_plain_string() {
    let id = EntityId::parse("obj1").unwrap();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"obj1\"");
    let back: EntityId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn deserialize_rejects_empty_string() {
    let result: Result<EntityId, _> = serde_json::from_str("\"\"");
    assert!(result.is_err());
}

#[test]
fn ids_hash_by_value() {
    let mut set = HashSet::new();
    set.insert(EntityId::parse("a").unwrap());
    set.insert(EntityId::parse("a").unwrap());
    set.insert(EntityId::parse("b").unwrap());
    assert_eq!(set.len(), 2);
}
