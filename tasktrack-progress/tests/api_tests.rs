//! Integration tests for the progress REST surface
//!
//! Drives the router with `oneshot` against an in-memory database and the
//! in-memory broker, then inspects the rows and the published events.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Duration;
use serde_json::Value;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt;

use tasktrack_common::broker::{MemoryBroker, QueueBinding};
use tasktrack_common::deadline::{derive_deadline_status_at, DeadlineStatus};
use tasktrack_common::events::{routing, NotificationEnvelope, ProgressStatus, StatusChangedEvent, TaskType};
use tasktrack_common::logchannel::LogPublisher;
use tasktrack_common::publisher::EventPublisher;

use tasktrack_progress::collaborators::{LocalDocumentStore, StaticUserDirectory};
use tasktrack_progress::db::{self, NewProgress};
use tasktrack_progress::republisher::StatusRepublisher;
use tasktrack_progress::{build_router, AppState, ProgressService};

const NOTIFY_QUEUE: &str = "test.notifications";
const STATUS_QUEUE: &str = "test.status";
const BOUNDARY: &str = "tasktrack-test-boundary";

const STUDENT: i64 = 12;
const LECTURER: i64 = 3;

struct TestApp {
    app: Router,
    db: SqlitePool,
    broker: Arc<MemoryBroker>,
    _documents: TempDir,
}

async fn create_test_app() -> TestApp {
    let db = tasktrack_common::db::open_in_memory().await.unwrap();
    db::init_schema(&db).await.unwrap();

    let broker = Arc::new(MemoryBroker::with_topology(vec![
        QueueBinding::topic(routing::NOTIFICATION_EXCHANGE, NOTIFY_QUEUE, &["progress.*"]),
        QueueBinding::topic(routing::PROGRESS_EXCHANGE, STATUS_QUEUE, routing::STATUS_KEYS),
        QueueBinding::plain(routing::LOG_QUEUE),
    ]));
    let log = LogPublisher::new(broker.clone(), routing::LOG_QUEUE, "progress-service");

    let documents = TempDir::new().unwrap();
    let users = StaticUserDirectory::new()
        .with(STUDENT, "Budi")
        .with(LECTURER, "Pak Joko");

    let service = ProgressService::new(
        db.clone(),
        EventPublisher::new(broker.clone(), routing::NOTIFICATION_EXCHANGE, log.clone()),
        StatusRepublisher::new(EventPublisher::new(broker.clone(), routing::PROGRESS_EXCHANGE, log)),
        Arc::new(users),
        Arc::new(LocalDocumentStore::new(documents.path(), "http://files.test/documents")),
        "progress-service",
    );

    TestApp {
        app: build_router(AppState::new(Arc::new(service))),
        db,
        broker,
        _documents: documents,
    }
}

/// Seed row as the ingestion consumer would write it
async fn seed(db: &SqlitePool, task_id: i64, task_type: TaskType, user_id: i64) -> i64 {
    let row = NewProgress {
        created_by: Some(LECTURER),
        group_id: (task_type == TaskType::Group).then_some(7),
        ..NewProgress::seed(task_id, task_type, user_id)
    };
    db::progress::insert(db, &row).await.unwrap().id
}

fn multipart(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/pdf\r\n\r\n",
                BOUNDARY, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn form_request(uri: &str, user_id: i64, role: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("x-user-id", user_id.to_string())
        .header("x-user-role", role)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn test_request(method: &str, uri: &str, user_id: i64, role: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", user_id.to_string())
        .header("x-user-role", role)
        .body(Body::empty())
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, extract_json(response.into_body()).await)
}

async fn drain<T: serde::de::DeserializeOwned>(broker: &MemoryBroker, queue: &str) -> Vec<(String, T)> {
    let mut out = Vec::new();
    while let Some((key, bytes)) = broker.take(queue).await {
        out.push((key, serde_json::from_slice(&bytes).unwrap()));
    }
    out
}

#[tokio::test]
async fn test_health_endpoint() {
    let t = create_test_app().await;
    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "tasktrack-progress");
}

#[tokio::test]
async fn test_missing_principal_is_unauthorized() {
    let t = create_test_app().await;
    let request = Request::builder()
        .uri("/progress/user/12")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_student_update_then_regress_then_review() {
    let t = create_test_app().await;
    let seed_id = seed(&t.db, 55, TaskType::Individual, STUDENT).await;

    // Scenario B: 40% moves the task to In-Progress
    let (status, json) = send(
        &t.app,
        form_request(
            &format!("/progress/{}", seed_id),
            STUDENT,
            "Mahasiswa",
            multipart(&[("progress", "40"), ("description", "Bab 1 selesai")], None),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["progress"], 40);
    assert_eq!(json["data"]["status"], "In-Progress");
    assert_eq!(json["data"]["userName"], "Budi");
    let updated_id = json["data"]["id"].as_i64().unwrap();

    let latest = db::progress::latest_for(&t.db, 55, STUDENT).await.unwrap().unwrap();
    let deadline = latest.created_at + Duration::days(2);
    assert_eq!(
        derive_deadline_status_at(deadline, latest.status.as_str(), latest.created_at),
        DeadlineStatus::DaysLeft(2)
    );

    // Scenario C: going back to 30% is rejected with the last value
    let (status, json) = send(
        &t.app,
        form_request(
            &format!("/progress/{}", updated_id),
            STUDENT,
            "Mahasiswa",
            multipart(&[("progress", "30")], None),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["lastProgress"], 40);

    // Scenario D: Done with a grade forces 100%
    let (status, json) = send(
        &t.app,
        form_request(
            &format!("/progress/{}/comment", updated_id),
            LECTURER,
            "Dosen",
            multipart(&[("action", "Done"), ("grade", "85")], None),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["data"]["progress"], 100);
    assert_eq!(json["data"]["status"], "Done");
    assert_eq!(json["data"]["grade"], 85);
    assert_eq!(json["data"]["dosenName"], "Pak Joko");
    assert_eq!(json["message"], "Progress saved as 'Done'");

    let latest = db::progress::latest_for(&t.db, 55, STUDENT).await.unwrap().unwrap();
    assert_eq!(
        derive_deadline_status_at(deadline, latest.status.as_str(), deadline + Duration::days(30))
            .to_string(),
        "Selesai"
    );

    let history = db::progress::history(&t.db, 55, STUDENT).await.unwrap();
    let values: Vec<i64> = history.iter().map(|r| r.progress).collect();
    assert_eq!(values, vec![0, 40, 100]);

    // A second review after Done is rejected
    let (status, _) = send(
        &t.app,
        form_request(
            &format!("/progress/{}/comment", updated_id),
            LECTURER,
            "Dosen",
            multipart(&[("action", "Revisi"), ("dosenComment", "Tambah referensi")], None),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_mutations_publish_status_and_notifications() {
    let t = create_test_app().await;
    let seed_id = seed(&t.db, 8, TaskType::Group, STUDENT).await;

    let (status, _) = send(
        &t.app,
        form_request(
            &format!("/progress/{}", seed_id),
            STUDENT,
            "Mahasiswa",
            multipart(&[("progress", "25")], None),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let statuses: Vec<(String, StatusChangedEvent)> = drain(&t.broker, STATUS_QUEUE).await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].0, routing::GROUP_TASK_UPDATED);
    assert_eq!(statuses[0].1.task_id, 8);
    assert_eq!(statuses[0].1.status, ProgressStatus::InProgress);
    assert_eq!(statuses[0].1.progress, 25);

    // Student plus task author
    let notes: Vec<(String, NotificationEnvelope)> = drain(&t.broker, NOTIFY_QUEUE).await;
    assert_eq!(notes.len(), 2);
    assert!(notes.iter().all(|(key, _)| key == routing::PROGRESS_UPDATED));
    assert_eq!(notes[0].1.user_id, Some(STUDENT));
    assert_eq!(notes[1].1.user_id, Some(LECTURER));
    assert!(notes[1].1.message.starts_with("Budi updated task progress to 25%"));

    let latest = db::progress::latest_for(&t.db, 8, STUDENT).await.unwrap().unwrap();
    let (status, _) = send(
        &t.app,
        form_request(
            &format!("/progress/{}/comment", latest.id),
            LECTURER,
            "Dosen",
            multipart(&[("action", "Revisi"), ("dosenComment", "Perbaiki bab 2")], None),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let notes: Vec<(String, NotificationEnvelope)> = drain(&t.broker, NOTIFY_QUEUE).await;
    assert_eq!(notes.len(), 2);
    assert!(notes.iter().all(|(key, _)| key == routing::PROGRESS_REVIEWED));
    assert_eq!(notes[0].1.user_id, Some(STUDENT));
    assert!(notes[0].1.message.contains("Perbaiki bab 2"));
    assert_eq!(notes[1].1.user_id, Some(LECTURER));

    // Every publish is mirrored to the log side-channel
    assert_eq!(t.broker.stats(routing::LOG_QUEUE).unwrap().published(), 6);
}

#[tokio::test]
async fn test_publish_failure_does_not_fail_the_mutation() {
    let t = create_test_app().await;
    let seed_id = seed(&t.db, 9, TaskType::Individual, STUDENT).await;
    t.broker.set_offline(true);

    let (status, json) = send(
        &t.app,
        form_request(
            &format!("/progress/{}", seed_id),
            STUDENT,
            "Mahasiswa",
            multipart(&[("progress", "10")], None),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["progress"], 10);
    assert_eq!(db::progress::history(&t.db, 9, STUDENT).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_upload_is_stored_and_linked() {
    let t = create_test_app().await;
    let seed_id = seed(&t.db, 10, TaskType::Individual, STUDENT).await;

    let (status, json) = send(
        &t.app,
        form_request(
            &format!("/progress/{}", seed_id),
            STUDENT,
            "Mahasiswa",
            multipart(&[("progress", "50")], Some(("draft 1.pdf", b"%PDF-1.4"))),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let url = json["data"]["fileUrl"].as_str().unwrap();
    assert!(url.starts_with("http://files.test/documents/progress/"));
    assert!(url.ends_with("_draft_1.pdf"));
    assert_eq!(json["data"]["document"], url);
    assert!(json["data"].get("storageKey").is_none());
}

#[tokio::test]
async fn test_role_rejections() {
    let t = create_test_app().await;
    let seed_id = seed(&t.db, 11, TaskType::Individual, STUDENT).await;

    // Another student
    let (status, _) = send(
        &t.app,
        form_request(
            &format!("/progress/{}", seed_id),
            99,
            "Mahasiswa",
            multipart(&[("progress", "20")], None),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Student may not report 100%
    let (status, _) = send(
        &t.app,
        form_request(
            &format!("/progress/{}", seed_id),
            STUDENT,
            "Mahasiswa",
            multipart(&[("progress", "100")], None),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Lecturer who did not create the task
    let (status, _) = send(
        &t.app,
        form_request(
            &format!("/progress/{}/comment", seed_id),
            77,
            "Dosen",
            multipart(&[("action", "Done")], None),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Revisi without a comment
    let (status, _) = send(
        &t.app,
        form_request(
            &format!("/progress/{}/comment", seed_id),
            LECTURER,
            "Dosen",
            multipart(&[("action", "Revisi")], None),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown record
    let (status, json) = send(
        &t.app,
        form_request(
            "/progress/4040",
            STUDENT,
            "Mahasiswa",
            multipart(&[("progress", "20")], None),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_task_listing_access() {
    let t = create_test_app().await;
    seed(&t.db, 20, TaskType::Individual, STUDENT).await;

    let (status, json) = send(
        &t.app,
        test_request("GET", "/progress/task/individual/20", STUDENT, "Mahasiswa"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);

    let (status, _) = send(
        &t.app,
        test_request("GET", "/progress/task/individual/20", LECTURER, "Dosen"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &t.app,
        test_request("GET", "/progress/task/individual/20", 99, "Mahasiswa"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&t.app, test_request("GET", "/progress/task/individual/20", 1, "Admin")).await;
    assert_eq!(status, StatusCode::OK);

    // Same task id, other type
    let (status, _) = send(&t.app, test_request("GET", "/progress/task/group/20", 1, "Admin")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_group_delete_is_scoped_to_the_student() {
    let t = create_test_app().await;
    seed(&t.db, 30, TaskType::Group, STUDENT).await;
    seed(&t.db, 30, TaskType::Group, 13).await;

    let (status, json) = send(
        &t.app,
        test_request("DELETE", "/progress/task/group/30", STUDENT, "Mahasiswa"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deleted"], 1);

    let remaining = db::progress::list_by_task(&t.db, 30, TaskType::Group).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].user_id, 13);

    let (status, json) = send(
        &t.app,
        test_request("DELETE", "/progress/task/group/30", LECTURER, "Dosen"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deleted"], 1);

    let (status, _) = send(
        &t.app,
        test_request("DELETE", "/progress/task/group/30", LECTURER, "Dosen"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_user_listing_and_stats() {
    let t = create_test_app().await;
    let first = seed(&t.db, 40, TaskType::Individual, STUDENT).await;
    seed(&t.db, 41, TaskType::Individual, STUDENT).await;

    let (status, _) = send(
        &t.app,
        form_request(
            &format!("/progress/{}", first),
            STUDENT,
            "Mahasiswa",
            multipart(&[("progress", "60")], None),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&t.app, test_request("GET", "/progress/user/12", STUDENT, "Mahasiswa")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 3);

    let (status, json) = send(&t.app, test_request("GET", "/progress/stats/12", STUDENT, "Mahasiswa")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 3);
    assert_eq!(json["done"], 0);
    assert_eq!(json["avg"], 20.0);
}

fn counter_value(rendered: &str, needles: &[&str]) -> f64 {
    rendered
        .lines()
        .filter(|line| line.starts_with("http_requests_total{"))
        .filter(|line| needles.iter().all(|needle| line.contains(needle)))
        .filter_map(|line| line.rsplit(' ').next())
        .filter_map(|value| value.parse::<f64>().ok())
        .sum()
}

#[tokio::test]
async fn test_metrics_count_matched_routes() {
    let handle = tasktrack_common::api::init_metrics().unwrap();
    let t = create_test_app().await;
    let needles = ["method=\"PUT\"", "route=\"/progress/:id/comment\"", "code=\"401\""];
    let before = counter_value(&handle.render(), &needles);

    let request = Request::builder()
        .method("PUT")
        .uri("/progress/9/comment")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let rendered = String::from_utf8(bytes.to_vec()).unwrap();

    assert_eq!(counter_value(&rendered, &needles), before + 1.0);
    assert!(!rendered.contains("route=\"/progress/9/comment\""));
    assert!(!rendered.contains("route=\"/health\""));
    assert!(!rendered.contains("route=\"/metrics\""));
}
