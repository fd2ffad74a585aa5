use kii_cloud::{
    AclAction, AclEntry, AclSubject, EntityId, KiiClient, KiiConfig, KiiError, Site,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{any, body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_client(server: &MockServer) -> KiiClient {
    KiiClient::new(KiiConfig::new("app", "key").with_site(Site::Custom(server.uri()))).unwrap()
}

fn user(id: &str) -> AclSubject {
    AclSubject::User(EntityId::parse(id).unwrap())
}

const BUCKET_ACL: &str = "/apps/app/buckets/scores/acl";

// ── Subjects and actions ────────────────────────────────────────

#[test]
fn subject_wire_forms() {
    let group = AclSubject::Group(EntityId::parse("g1").unwrap());
    assert_eq!(user("u1").to_wire(), "UserID:u1");
    assert_eq!(group.to_wire(), "GroupID:g1");
    assert_eq!(AclSubject::AnyAuthenticatedUser.to_wire(), "UserID:ANY_AUTHENTICATED_USER");
    assert_eq!(AclSubject::AnonymousUser.to_wire(), "UserID:ANONYMOUS_USER");

    assert_eq!(AclSubject::from_wire("UserID:ANONYMOUS_USER"), Some(AclSubject::AnonymousUser));
    assert_eq!(AclSubject::from_wire("GroupID:g1"), Some(group));
    assert_eq!(AclSubject::from_wire("Nobody:x"), None);
    assert_eq!(AclSubject::from_wire("UserID"), None);
}

#[test]
fn action_names_parse_back() {
    for action in AclAction::ALL {
        assert_eq!(action.as_str().parse::<AclAction>().unwrap(), action);
    }
    assert!("READ".parse::<AclAction>().is_err());
}

#[test]
fn entry_display_names_action_and_subject() {
    let entry = AclEntry::new(user("u1"), AclAction::ReadExistingObject);
    assert_eq!(entry.to_string(), "READ_EXISTING_OBJECT for UserID:u1");
}

// ── Staging ─────────────────────────────────────────────────────

#[test]
fn revocation_wins_over_grant() {
    let client = KiiClient::new(KiiConfig::new("app", "key")).unwrap();
    let mut acl = client.bucket("scores").unwrap().acl();
    acl.add_entry(user("u1"), AclAction::QueryObjectsInBucket);
    acl.add_entry(user("u2"), AclAction::QueryObjectsInBucket);
    acl.revoke_entry(user("u1"), AclAction::QueryObjectsInBucket);

    let (grant, revoke) = acl.batch();
    assert_eq!(grant, vec![AclEntry::new(user("u2"), AclAction::QueryObjectsInBucket)]);
    assert_eq!(revoke, vec![AclEntry::new(user("u1"), AclAction::QueryObjectsInBucket)]);
    assert!(acl.has_pending_changes());

    acl.discard_pending();
    assert!(!acl.has_pending_changes());
    assert_eq!(acl.batch(), (Vec::new(), Vec::new()));
}

// ── Save ────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_batch_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut acl = mock_client(&server).bucket("scores").unwrap().acl();
    acl.save().await.unwrap();
    assert!(acl.entries().is_empty());
}

#[tokio::test]
async fn save_sends_one_batch_and_applies_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(BUCKET_ACL))
        .and(body_json(json!({
            "grant": [
                {"subject": "UserID:u2", "action": "QUERY_OBJECTS_IN_BUCKET"},
                {"subject": "UserID:ANY_AUTHENTICATED_USER", "action": "CREATE_OBJECTS_IN_BUCKET"}
            ],
            "revoke": [
                {"subject": "UserID:u1", "action": "QUERY_OBJECTS_IN_BUCKET"}
            ]
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut acl = mock_client(&server).bucket("scores").unwrap().acl();
    acl.add_entry(user("u2"), AclAction::QueryObjectsInBucket);
    acl.add_entry(AclSubject::AnyAuthenticatedUser, AclAction::CreateObjectsInBucket);
    acl.revoke_entry(user("u1"), AclAction::QueryObjectsInBucket);
    acl.save().await.unwrap();

    assert!(!acl.has_pending_changes());
    assert!(acl.contains(&user("u2"), AclAction::QueryObjectsInBucket));
    assert!(acl.contains(&AclSubject::AnyAuthenticatedUser, AclAction::CreateObjectsInBucket));
    assert!(!acl.contains(&user("u1"), AclAction::QueryObjectsInBucket));
}

#[tokio::test]
async fn grant_and_revoke_of_a_held_entry_removes_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(BUCKET_ACL))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "QUERY_OBJECTS_IN_BUCKET": [{"userID": "u1"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(BUCKET_ACL))
        .and(body_json(json!({
            "grant": [],
            "revoke": [{"subject": "UserID:u1", "action": "QUERY_OBJECTS_IN_BUCKET"}]
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut acl = mock_client(&server).bucket("scores").unwrap().acl();
    acl.refresh().await.unwrap();
    assert!(acl.contains(&user("u1"), AclAction::QueryObjectsInBucket));

    acl.add_entry(user("u1"), AclAction::QueryObjectsInBucket);
    acl.revoke_entry(user("u1"), AclAction::QueryObjectsInBucket);
    acl.save().await.unwrap();

    assert!(!acl.contains(&user("u1"), AclAction::QueryObjectsInBucket));
    assert!(acl.entries().is_empty());
    assert!(!acl.has_pending_changes());
}

#[tokio::test]
async fn rejected_batch_names_the_entry_and_changes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(BUCKET_ACL))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "errorCode": "ACL_ALREADY_EXISTS",
            "message": "entry already granted",
            "rejectedEntry": {"subject": "UserID:u2", "action": "QUERY_OBJECTS_IN_BUCKET"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut acl = mock_client(&server).bucket("scores").unwrap().acl();
    acl.add_entry(user("u2"), AclAction::QueryObjectsInBucket);
    acl.add_entry(user("u3"), AclAction::QueryObjectsInBucket);

    let err = acl.save().await.unwrap_err();
    match &err {
        KiiError::AclRejected { entry, source } => {
            assert_eq!(
                entry.as_ref(),
                Some(&AclEntry::new(user("u2"), AclAction::QueryObjectsInBucket))
            );
            assert_eq!(source.error_code(), Some("ACL_ALREADY_EXISTS"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.status(), Some(409));
    assert!(err.to_string().contains("QUERY_OBJECTS_IN_BUCKET for UserID:u2"));

    assert!(acl.entries().is_empty());
    assert_eq!(acl.pending_additions().len(), 2);
}

#[tokio::test]
async fn object_acl_lives_under_the_object() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/apps/app/buckets/scores/objects/o1/acl"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let object = client
        .object_with_uri("kiicloud://buckets/scores/objects/o1")
        .unwrap();
    let mut acl = object.acl().unwrap();
    acl.add_entry(AclSubject::AnonymousUser, AclAction::ReadExistingObject);
    acl.save().await.unwrap();
}

// ── Refresh ─────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_reads_listing_and_keeps_staged_changes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(BUCKET_ACL))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "QUERY_OBJECTS_IN_BUCKET": [{"userID": "u1"}, {"groupID": "g1"}],
            "CREATE_OBJECTS_IN_BUCKET": [{"userID": "ANY_AUTHENTICATED_USER"}],
            "SOMETHING_NEW": [{"userID": "u9"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut acl = mock_client(&server).bucket("scores").unwrap().acl();
    acl.revoke_entry(user("u1"), AclAction::QueryObjectsInBucket);
    acl.refresh().await.unwrap();

    assert_eq!(acl.entries().len(), 3);
    assert!(acl.contains(&user("u1"), AclAction::QueryObjectsInBucket));
    assert!(acl.contains(
        &AclSubject::Group(EntityId::parse("g1").unwrap()),
        AclAction::QueryObjectsInBucket
    ));
    assert!(acl.contains(&AclSubject::AnyAuthenticatedUser, AclAction::CreateObjectsInBucket));
    assert_eq!(acl.pending_revocations().len(), 1);
}
