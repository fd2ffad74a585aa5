use kii_cloud::{Clause, Entity, Fields, KiiClient, KiiConfig, KiiError, Query, Site, SyncState};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{any, body_json, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_client(server: &MockServer) -> KiiClient {
    KiiClient::new(KiiConfig::new("app", "key").with_site(Site::Custom(server.uri()))).unwrap()
}

const QUERY_PATH: &str = "/apps/app/buckets/scores/query";

// ── Validation before sending ───────────────────────────────────

#[tokio::test]
async fn limit_out_of_range_never_reaches_the_server() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let bucket = mock_client(&server).bucket("scores").unwrap();
    for limit in [0, 150] {
        let mut query = Query::all();
        query.set_limit(limit);
        let err = bucket.execute_query(&query, None).await.unwrap_err();
        assert!(matches!(err, KiiError::InvalidQuery(_)), "limit {limit}: {err:?}");
        assert!(err.is_validation());
    }
}

#[tokio::test]
async fn query_pinned_to_another_bucket_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let query = Query::all().on_collection("other");
    let err = client
        .bucket("scores")
        .unwrap()
        .execute_query(&query, None)
        .await
        .unwrap_err();
    assert!(matches!(err, KiiError::InvalidQuery(_)));

    let query = Query::all().on_container("scores");
    let err = client
        .bucket("scores")
        .unwrap()
        .execute_query(&query, None)
        .await
        .unwrap_err();
    assert!(matches!(err, KiiError::InvalidQuery(_)));
}

#[tokio::test]
async fn empty_compound_clause_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let query = Query::with_clause(Clause::and(Vec::new()));
    let err = mock_client(&server)
        .bucket("scores")
        .unwrap()
        .execute_query(&query, None)
        .await
        .unwrap_err();
    assert!(matches!(err, KiiError::InvalidQuery(_)));
}

// ── Request shape ───────────────────────────────────────────────

#[tokio::test]
async fn query_sends_clause_sort_and_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(header("Content-Type", "application/vnd.kii.QueryRequest+json"))
        .and(body_json(json!({
            "bucketQuery": {
                "clause": {"type": "eq", "field": "player", "value": "alice"},
                "orderBy": "y",
                "descending": true
            },
            "bestEffortLimit": 10
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "queryDescription": "WHERE ( 1 = 1 )",
            "results": [
                {"_id": "o2", "_created": 20, "_modified": 25, "_owner": "u1", "y": 9},
                {"_id": "o1", "_created": 10, "_modified": 10, "y": 3}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut query = Query::with_clause(Clause::equals("player", "alice"));
    query.sort_by_desc("y");
    query.set_limit(10);

    let page = mock_client(&server)
        .bucket("scores")
        .unwrap()
        .execute_query(&query, None)
        .await
        .unwrap();

    assert!(!page.has_next());
    let ids: Vec<&str> = page
        .results
        .iter()
        .filter_map(|o| o.uuid().map(|id| id.as_str()))
        .collect();
    assert_eq!(ids, vec!["o2", "o1"]);

    let first = &page.results[0];
    assert_eq!(first.state(), SyncState::Synced);
    assert_eq!(first.get_field("y"), Some(&json!(9)));
    assert!(!first.has_field("_owner"));
    assert_eq!(first.bucket_name(), "scores");
    assert_eq!(first.modified().map(|t| t.as_millis()), Some(25));
}

#[tokio::test]
async fn user_scope_bucket_queries_under_the_user() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/apps/app/users/u1/buckets/notes/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let object = client
        .object_with_uri("kiicloud://users/u1/buckets/notes/objects/o1")
        .unwrap();
    let bucket = client.user_with_id("u1").unwrap().bucket("notes").unwrap();
    assert_eq!(bucket.scope(), object.scope());

    let page = bucket.execute_query(&Query::all(), None).await.unwrap();
    assert!(page.results.is_empty());
}

// ── Pagination ──────────────────────────────────────────────────

#[tokio::test]
async fn pagination_key_is_passed_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(body_partial_json(json!({"paginationKey": "page2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"_id": "o3", "_created": 3}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"_id": "o1", "_created": 1}, {"_id": "o2", "_created": 2}],
            "nextPaginationKey": "page2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let bucket = mock_client(&server).bucket("scores").unwrap();
    let query = Query::all();

    let first = bucket.execute_query(&query, None).await.unwrap();
    assert!(first.has_next());
    assert_eq!(first.next_pagination_key.as_deref(), Some("page2"));
    assert_eq!(first.results.len(), 2);

    let second = bucket
        .execute_query(&query, first.next_pagination_key.as_deref())
        .await
        .unwrap();
    assert!(!second.has_next());
    assert_eq!(second.results.len(), 1);
}

#[tokio::test]
async fn execute_query_all_follows_every_page() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(body_partial_json(json!({"paginationKey": "k2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"_id": "o3"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(body_partial_json(json!({"paginationKey": "k1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"_id": "o2"}],
            "nextPaginationKey": "k2"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"_id": "o1"}],
            "nextPaginationKey": "k1"
        })))
        .mount(&server)
        .await;

    let all = mock_client(&server)
        .bucket("scores")
        .unwrap()
        .execute_query_all(&Query::all())
        .await
        .unwrap();
    let ids: Vec<String> = all
        .iter()
        .filter_map(|o| o.uuid().map(ToString::to_string))
        .collect();
    assert_eq!(ids, vec!["o1", "o2", "o3"]);
}

#[tokio::test]
async fn non_array_results_are_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": "nope"})))
        .mount(&server)
        .await;

    let err = mock_client(&server)
        .bucket("scores")
        .unwrap()
        .execute_query(&Query::all(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, KiiError::MalformedResponse(_)));
    assert!(err.is_transport());
}

// ── Bucket deletion ─────────────────────────────────────────────

#[tokio::test]
async fn bucket_delete_hits_bucket_path() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/apps/app/buckets/scores"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    mock_client(&server)
        .bucket("scores")
        .unwrap()
        .delete()
        .await
        .unwrap();
}

#[test]
fn bad_bucket_names_are_rejected() {
    let client = KiiClient::new(KiiConfig::new("app", "key")).unwrap();
    assert!(client.bucket("x").is_err());
    assert!(client.bucket("has space").is_err());
    assert!(client.file_bucket("a/b").is_err());
    assert!(client.bucket("ok_name-1").is_ok());
}
