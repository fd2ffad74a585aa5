use kii_cloud::{
    Entity, Fields, KiiClient, KiiConfig, KiiError, ServerTime, Site, SyncState, TransportError,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{any, body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_client(server: &MockServer) -> KiiClient {
    KiiClient::new(KiiConfig::new("app", "key").with_site(Site::Custom(server.uri()))).unwrap()
}

fn offline_client() -> KiiClient {
    KiiClient::new(KiiConfig::new("app", "key").with_site(Site::Custom("http://127.0.0.1:9".into())))
        .unwrap()
}

const OBJECTS: &str = "/apps/app/buckets/scores/objects";

async fn mount_create(server: &MockServer, id: &str) {
    Mock::given(method("POST"))
        .and(path(OBJECTS))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "objectID": id,
            "createdAt": 1000,
            "dataType": "application/json"
        })))
        .mount(server)
        .await;
}

// ── Field access ────────────────────────────────────────────────

#[test]
fn new_object_is_local() {
    let object = offline_client().bucket("scores").unwrap().create_object();
    assert_eq!(object.state(), SyncState::Local);
    assert!(object.uuid().is_none());
    assert!(object.created().is_none());
    assert!(object.modified().is_none());
}

#[test]
fn set_and_get_fields() {
    let mut object = offline_client().bucket("scores").unwrap().create_object();
    object.set_field("points", 42).unwrap();
    object.set_field("tags", vec!["a", "b"]).unwrap();
    object.set_field("nested", json!({"x": 1.5})).unwrap();

    assert_eq!(object.get_field("points"), Some(&json!(42)));
    assert_eq!(object.get_field_as::<Vec<String>>("tags"), Some(vec!["a".to_string(), "b".to_string()]));
    assert!(object.has_field("nested"));
    assert!(!object.has_field("missing"));
    assert_eq!(object.get_field_as::<String>("points"), None);
}

#[test]
fn reserved_keys_are_rejected() {
    let mut object = offline_client().bucket("scores").unwrap().create_object();
    for key in ["created", "modified", "type", "uuid", "_owner", ""] {
        let err = object.set_field(key, 1).unwrap_err();
        assert!(err.is_validation(), "{key:?} should be rejected, got {err:?}");
    }
    assert!(object.core().fields().is_empty());
}

#[test]
fn null_and_non_finite_values_are_rejected() {
    let mut object = offline_client().bucket("scores").unwrap().create_object();
    let err = object.set_field("gone", Option::<i32>::None).unwrap_err();
    assert!(matches!(err, KiiError::InvalidFieldType { ref key, .. } if key == "gone"));

    let err = object.set_field("ratio", f64::NAN).unwrap_err();
    assert!(matches!(err, KiiError::InvalidFieldType { .. }));
    assert!(!object.has_field("ratio"));
}

#[test]
fn local_object_has_no_uri_or_acl() {
    let object = offline_client().bucket("scores").unwrap().create_object();
    assert!(matches!(object.object_uri(), Err(KiiError::Precondition(_))));
    assert!(matches!(object.acl(), Err(KiiError::Precondition(_))));
}

#[tokio::test]
async fn refresh_and_delete_require_saved_object() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut object = mock_client(&server).bucket("scores").unwrap().create_object();
    assert!(matches!(object.refresh().await, Err(KiiError::Precondition(_))));
    assert!(matches!(object.delete().await, Err(KiiError::Precondition(_))));
}

// ── Save ────────────────────────────────────────────────────────

#[tokio::test]
async fn first_save_creates_with_full_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(OBJECTS))
        .and(header("X-Kii-AppID", "app"))
        .and(header("X-Kii-AppKey", "key"))
        .and(body_json(json!({"points": 42, "player": "alice"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "objectID": "obj1",
            "createdAt": 1000,
            "dataType": "application/json"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut object = mock_client(&server).bucket("scores").unwrap().create_object();
    object.set_field("points", 42).unwrap();
    object.set_field("player", "alice").unwrap();
    object.save().await.unwrap();

    assert_eq!(object.state(), SyncState::Synced);
    assert_eq!(object.uuid().map(|id| id.as_str()), Some("obj1"));
    assert_eq!(object.created(), Some(ServerTime::from_millis(1000)));
    assert_eq!(object.modified(), Some(ServerTime::from_millis(1000)));
    assert_eq!(
        object.object_uri().unwrap().to_string(),
        "kiicloud://buckets/scores/objects/obj1"
    );
}

#[tokio::test]
async fn second_save_sends_only_the_delta() {
    let server = MockServer::start().await;
    mount_create(&server, "obj1").await;
    Mock::given(method("PATCH"))
        .and(path(format!("{OBJECTS}/obj1")))
        .and(header("Content-Type", "application/merge-patch+json"))
        .and(body_json(json!({"points": 50, "player": null})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_modified": 2000})))
        .expect(1)
        .mount(&server)
        .await;

    let mut object = mock_client(&server).bucket("scores").unwrap().create_object();
    object.set_field("points", 42).unwrap();
    object.set_field("player", "alice").unwrap();
    object.set_field("level", 3).unwrap();
    object.save().await.unwrap();

    object.set_field("points", 50).unwrap();
    object.remove_field("player").unwrap();
    assert_eq!(object.state(), SyncState::Dirty);
    object.save().await.unwrap();

    assert_eq!(object.state(), SyncState::Synced);
    assert_eq!(object.modified(), Some(ServerTime::from_millis(2000)));
    assert_eq!(object.get_field("level"), Some(&json!(3)));
    assert!(!object.has_field("player"));
}

#[tokio::test]
async fn removing_an_unloaded_field_still_sends_null() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path(format!("{OBJECTS}/o1")))
        .and(body_json(json!({"a": null})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_modified": 3000})))
        .expect(1)
        .mount(&server)
        .await;

    let mut object = mock_client(&server)
        .object_with_uri("kiicloud://buckets/scores/objects/o1")
        .unwrap();
    assert_eq!(object.state(), SyncState::Synced);

    object.remove_field("a").unwrap();
    assert_eq!(object.state(), SyncState::Dirty);
    assert_eq!(object.core().dirty_keys().collect::<Vec<_>>(), vec!["a"]);

    object.save().await.unwrap();
    assert_eq!(object.state(), SyncState::Synced);
    assert!(!object.has_field("a"));
}

#[tokio::test]
async fn save_without_changes_sends_nothing() {
    let server = MockServer::start().await;
    mount_create(&server, "obj1").await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut object = mock_client(&server).bucket("scores").unwrap().create_object();
    object.set_field("points", 1).unwrap();
    object.save().await.unwrap();
    object.save().await.unwrap();
    object.save().await.unwrap();
    assert_eq!(object.state(), SyncState::Synced);
}

#[tokio::test]
async fn failed_save_keeps_changes() {
    let server = MockServer::start().await;
    mount_create(&server, "obj1").await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "errorCode": "INTERNAL_ERROR",
            "message": "try again"
        })))
        .mount(&server)
        .await;

    let mut object = mock_client(&server).bucket("scores").unwrap().create_object();
    object.set_field("points", 1).unwrap();
    object.save().await.unwrap();

    object.set_field("points", 2).unwrap();
    let err = object.save().await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    match err {
        KiiError::Transport(TransportError::Status { error_code, message, .. }) => {
            assert_eq!(error_code.as_deref(), Some("INTERNAL_ERROR"));
            assert_eq!(message, "try again");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(object.state(), SyncState::Dirty);
    assert_eq!(object.core().dirty_keys().collect::<Vec<_>>(), vec!["points"]);
    assert_eq!(object.get_field("points"), Some(&json!(2)));
}

#[tokio::test]
async fn failed_create_stays_local() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(OBJECTS))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let mut object = mock_client(&server).bucket("scores").unwrap().create_object();
    object.set_field("points", 1).unwrap();
    let err = object.save().await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert_eq!(object.state(), SyncState::Local);
    assert!(object.core().is_dirty());
}

// ── Refresh ─────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_replaces_local_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{OBJECTS}/obj9")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_id": "obj9",
            "_created": 100,
            "_modified": 300,
            "_owner": "someone",
            "_version": "3",
            "points": 7
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let mut object = client
        .object_with_uri("kiicloud://buckets/scores/objects/obj9")
        .unwrap();
    assert_eq!(object.state(), SyncState::Synced);
    object.set_field("local_only", true).unwrap();

    object.refresh().await.unwrap();
    assert_eq!(object.state(), SyncState::Synced);
    assert_eq!(object.get_field("points"), Some(&json!(7)));
    assert!(!object.has_field("local_only"));
    assert!(!object.has_field("_owner"));
    assert_eq!(object.created(), Some(ServerTime::from_millis(100)));
    assert_eq!(object.modified(), Some(ServerTime::from_millis(300)));
}

// ── Delete ──────────────────────────────────────────────────────

#[tokio::test]
async fn deleted_object_rejects_everything() {
    let server = MockServer::start().await;
    mount_create(&server, "obj1").await;
    Mock::given(method("DELETE"))
        .and(path(format!("{OBJECTS}/obj1")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut object = mock_client(&server).bucket("scores").unwrap().create_object();
    object.set_field("points", 1).unwrap();
    object.save().await.unwrap();
    object.delete().await.unwrap();

    assert_eq!(object.state(), SyncState::Deleted);
    assert!(matches!(object.set_field("points", 2), Err(KiiError::StaleEntity(_))));
    assert!(matches!(object.remove_field("points"), Err(KiiError::StaleEntity(_))));
    assert!(matches!(object.save().await, Err(KiiError::StaleEntity(_))));
    assert!(matches!(object.refresh().await, Err(KiiError::StaleEntity(_))));
    assert!(matches!(object.delete().await, Err(KiiError::StaleEntity(_))));
}

// ── URIs and describe ───────────────────────────────────────────

#[test]
fn object_with_uri_keeps_scope() {
    let client = offline_client();
    let object = client
        .object_with_uri("kiicloud://users/u1/buckets/notes/objects/o1")
        .unwrap();
    assert_eq!(object.bucket_name(), "notes");
    assert_eq!(
        object.object_uri().unwrap().to_string(),
        "kiicloud://users/u1/buckets/notes/objects/o1"
    );

    assert!(client.object_with_uri("kiicloud://users/u1").is_err());
    assert!(client.object_with_uri("http://example.com").is_err());
}

#[test]
fn describe_marks_unsaved_changes() {
    let client = offline_client();
    let mut object = client
        .object_with_uri("kiicloud://buckets/scores/objects/o1")
        .unwrap();
    object.set_field("points", 3).unwrap();

    let text = object.describe();
    assert!(text.starts_with("object o1 [Dirty]"), "{text}");
    assert!(text.contains("points* = 3"), "{text}");
}
