use kii_cloud::{Entity, Fields, KiiClient, KiiConfig, KiiError, Progress, Query, Site, SyncState};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_client(server: &MockServer) -> KiiClient {
    KiiClient::new(KiiConfig::new("app", "key").with_site(Site::Custom(server.uri()))).unwrap()
}

fn create_mock(id: &str) -> Mock {
    Mock::given(method("POST"))
        .and(path("/apps/app/buckets/scores/objects"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "objectID": id,
            "createdAt": 1000
        })))
}

// ── Blocking form ───────────────────────────────────────────────

#[test]
fn blocking_save_from_plain_thread() {
    // The mock server runs on its own thread; this runtime only drives setup.
    let setup = Runtime::new().unwrap();
    let server = setup.block_on(MockServer::start());
    setup.block_on(create_mock("obj1").expect(1).mount(&server));

    let client = mock_client(&server);
    let mut object = client.bucket("scores").unwrap().create_object();
    object.set_field("points", 1).unwrap();
    object.save_blocking().unwrap();

    assert_eq!(object.state(), SyncState::Synced);
    assert_eq!(object.uuid().map(|id| id.as_str()), Some("obj1"));
}

#[test]
fn blocking_query_and_sign_in() {
    let setup = Runtime::new().unwrap();
    let server = setup.block_on(MockServer::start());
    setup.block_on(
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "u1",
                "access_token": "tok-1"
            })))
            .mount(&server),
    );
    setup.block_on(
        Mock::given(method("GET"))
            .and(path("/apps/app/users/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "userID": "u1",
                "loginName": "alice123"
            })))
            .mount(&server),
    );
    setup.block_on(
        Mock::given(method("POST"))
            .and(path("/apps/app/buckets/scores/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"_id": "o1", "points": 3}]
            })))
            .mount(&server),
    );

    let client = mock_client(&server);
    let user = client.authenticate_blocking("alice123", "abc123$$").unwrap();
    assert_eq!(user.access_token(), Some("tok-1"));

    let mut bucket = client.bucket("scores").unwrap();
    let page = bucket.execute_query_blocking(&Query::all(), None).unwrap();
    assert_eq!(page.results.len(), 1);
    assert_eq!(page.results[0].get_field("points"), Some(&json!(3)));
}

#[tokio::test]
async fn blocking_call_inside_a_runtime_is_refused() {
    let server = MockServer::start().await;
    create_mock("obj1").expect(0).mount(&server).await;

    let client = mock_client(&server);
    let mut object = client.bucket("scores").unwrap().create_object();
    object.set_field("points", 1).unwrap();

    let err = object.save_blocking().unwrap_err();
    assert!(matches!(err, KiiError::Precondition(_)));
    assert_eq!(object.state(), SyncState::Local);
    assert!(object.core().is_dirty());
}

// ── Background form ─────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_save_on_caller_runtime() {
    let server = MockServer::start().await;
    create_mock("obj2").expect(1).mount(&server).await;

    let client = mock_client(&server);
    let mut object = client.bucket("scores").unwrap().create_object();
    object.set_field("points", 2).unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();
    let task = object.save_in_background(&Handle::current(), move |object, result| {
        let _ = tx.send((object, result));
    });

    let (object, result) = rx.await.unwrap();
    task.await.unwrap();
    result.unwrap();
    assert_eq!(object.state(), SyncState::Synced);
    assert_eq!(object.uuid().map(|id| id.as_str()), Some("obj2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_failure_reaches_the_callback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/apps/app/buckets/scores/objects"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let mut object = client.bucket("scores").unwrap().create_object();
    object.set_field("points", 2).unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();
    object.save_in_background(&Handle::current(), move |object, result| {
        let _ = tx.send((object, result));
    });

    let (object, result) = rx.await.unwrap();
    assert_eq!(result.unwrap_err().status(), Some(500));
    assert_eq!(object.state(), SyncState::Local);
}

#[test]
fn background_save_on_client_worker() {
    let setup = Runtime::new().unwrap();
    let server = setup.block_on(MockServer::start());
    setup.block_on(create_mock("obj3").expect(1).mount(&server));

    let client = mock_client(&server);
    let worker = client.worker().unwrap();
    let mut object = client.bucket("scores").unwrap().create_object();
    object.set_field("points", 3).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    object.save_in_background(&worker, move |object, result| {
        let on_worker = std::thread::current()
            .name()
            .is_some_and(|name| name.starts_with("kii-worker"));
        let _ = tx.send((object, result, on_worker));
    });

    let (object, result, on_worker) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    result.unwrap();
    assert!(on_worker);
    assert_eq!(object.state(), SyncState::Synced);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_upload_reports_progress_and_returns_the_file() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("big.bin");
    std::fs::write(&local, vec![3u8; 150_000]).unwrap();

    Mock::given(method("POST"))
        .and(path("/apps/app/filebuckets/docs/files"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"fileID": "f9"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/apps/app/filebuckets/docs/files/f9/body"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let file = client.file_bucket("docs").unwrap().file_with_local_path(&local);
    let (progress, seen) = recorder();

    let (tx, rx) = tokio::sync::oneshot::channel();
    file.save_file_in_background(&Handle::current(), Some(progress), move |file, result| {
        let _ = tx.send((file, result));
    });

    let (file, result) = rx.await.unwrap();
    result.unwrap();
    assert_eq!(file.uuid().map(|id| id.as_str()), Some("f9"));
    assert!(file.has_body());
    assert_eq!(file.file_size(), Some(150_000));

    let seen = seen.lock().unwrap().clone();
    assert!(seen.len() >= 2, "{seen:?}");
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(seen.last().copied(), Some(1.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_download_writes_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apps/app/filebuckets/docs/files/f1/body"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.bin");
    let client = mock_client(&server);
    let file = client
        .file_with_uri("kiicloud://filebuckets/docs/files/f1")
        .unwrap();
    let (progress, seen) = recorder();

    let (tx, rx) = tokio::sync::oneshot::channel();
    file.get_body_in_background(&Handle::current(), &target, Some(progress), move |file, result| {
        let _ = tx.send((file, result));
    });

    let (file, result) = rx.await.unwrap();
    result.unwrap();
    assert_eq!(file.state(), SyncState::Synced);
    assert_eq!(std::fs::read(&target).unwrap(), b"payload");
    assert_eq!(seen.lock().unwrap().last().copied(), Some(1.0));
}

// ── Progress ────────────────────────────────────────────────────

fn recorder() -> (Progress, Arc<Mutex<Vec<f64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (Progress::new(move |f| sink.lock().unwrap().push(f)), seen)
}

#[test]
fn progress_is_clamped_and_monotonic() {
    let (progress, seen) = recorder();
    progress.report(-0.5);
    progress.report(0.25);
    progress.report(0.25);
    progress.report(0.1);
    progress.report(f64::NAN);
    progress.report(0.75);
    progress.report(3.0);
    progress.report(1.0);

    assert_eq!(*seen.lock().unwrap(), vec![0.0, 0.25, 0.75, 1.0]);
    assert_eq!(progress.last(), Some(1.0));
}

#[test]
fn progress_clones_share_the_high_water_mark() {
    let (progress, seen) = recorder();
    let other = progress.clone();
    progress.report_bytes(50, 100);
    other.report_bytes(25, 100);
    other.report_bytes(0, 0);

    assert_eq!(*seen.lock().unwrap(), vec![0.5, 1.0]);
    assert_eq!(progress.last(), Some(1.0));
}
