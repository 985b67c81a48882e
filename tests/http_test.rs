//! The HTTP surface, driven through the router without a socket.

mod helpers;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use hal_broker::app_state::AppState;
use hal_broker::config::AppConfig;
use hal_broker::models::job::JobStatus;
use hal_broker::routes;
use hal_broker::services::identity::JobId;
use helpers::*;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: AppState,
    pipeline: Arc<FakePipeline>,
}

async fn test_app(dir: &Path, base_path: Option<&str>) -> TestApp {
    let config = AppConfig {
        base_path: base_path.map(str::to_string),
        results_dir: dir.join("results"),
        ..AppConfig::default()
    }
    .validate()
    .unwrap();

    let pipeline = FakePipeline::held(sample_fields());
    let state = AppState::new(open_store(dir).await, pipeline.clone(), &config);
    TestApp {
        router: routes::router(state.clone(), None),
        state,
        pipeline,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

fn ask(uri: &str, form: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn poll(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_ping() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), None).await;

    let (status, _, body) = send(&app.router, get("/ping")).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "OK");
}

#[tokio::test]
async fn test_index_has_question_form() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), None).await;

    let (status, _, body) = send(&app.router, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    let page = String::from_utf8(body).unwrap();
    assert!(page.contains("action=\"/ask\""));
    assert!(page.contains("name=\"question\""));
}

#[tokio::test]
async fn test_ask_redirects_and_polls_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), None).await;
    let form = "question=museums+in+Springfield";
    let id = JobId::from_input(form).unwrap();

    let (status, headers, _) = send(&app.router, ask("/ask", form)).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[header::LOCATION], format!("/ask/{id}").as_str());

    let (status, _, body) = send(&app.router, poll(&format!("/ask/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let record: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(record["status"], "in_progress");
    assert_eq!(record["input"], form);

    let (status, _, body) = send(&app.router, get(&format!("/ask/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let page = String::from_utf8(body).unwrap();
    assert!(page.contains(&format!("const questionId = \"{id}\";")));
    assert!(page.contains("input: question: museums in Springfield"));

    app.pipeline.release(1);
    poll_until_finished(&app.state.status, id.as_str(), Duration::from_secs(5)).await;

    let (status, _, body) = send(&app.router, poll(&format!("/ask/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let record: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(record["status"], "succeeded");
    assert_eq!(record["place"], "Springfield");

    // Asking again lands on the finished job.
    let (status, headers, _) = send(&app.router, ask("/ask", form)).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[header::LOCATION], format!("/ask/{id}").as_str());
    assert_eq!(
        app.state.status.query(id.as_str()).await.unwrap().status,
        JobStatus::Succeeded
    );
    assert_eq!(app.pipeline.calls(), 1);
}

#[tokio::test]
async fn test_unknown_job_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), None).await;
    let id = JobId::from_input("question=never+asked").unwrap();

    let (status, _, body) = send(&app.router, poll(&format!("/ask/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "Not found");

    let (status, _, _) = send(&app.router, get(&format!("/ask/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app.router, poll("/ask/not-an-id")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_question_never_reaches_store() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), None).await;

    for form in ["", "lang=en", "question="] {
        let (status, _, _) = send(&app.router, ask("/ask", form)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "form {form:?}");
    }
    assert!(app.state.store.is_empty().await);
    assert_eq!(app.pipeline.calls(), 0);
}

#[tokio::test]
async fn test_results_are_served_from_results_dir() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), None).await;

    let folder = dir.path().join("results").join("Springfield_museums");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("data.overpass.json"), r#"{"elements": []}"#).unwrap();
    std::fs::write(dir.path().join("secret.txt"), "keep out").unwrap();

    let (status, headers, body) = send(
        &app.router,
        get("/results/Springfield_museums/data.overpass.json"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CONTENT_TYPE],
        "application/json; charset=utf-8"
    );
    assert_eq!(body, br#"{"elements": []}"#);

    let (status, _, _) = send(&app.router, get("/results/Springfield_museums/missing.json")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = send(&app.router, get("/results/%2E%2E/secret.txt")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!String::from_utf8(body).unwrap().contains("keep out"));
}

#[tokio::test]
async fn test_routes_live_under_base_path() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), Some("/hal")).await;
    let form = "question=trails";
    let id = JobId::from_input(form).unwrap();

    let (status, _, _) = send(&app.router, get("/hal/ping")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app.router, get("/ping")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    for uri in ["/hal", "/hal/"] {
        let (status, _, body) = send(&app.router, get(uri)).await;
        assert_eq!(status, StatusCode::OK, "index at {uri}");
        assert!(String::from_utf8(body).unwrap().contains("action=\"/hal/ask\""));
    }

    let (status, headers, _) = send(&app.router, ask("/hal/ask", form)).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[header::LOCATION], format!("/hal/ask/{id}").as_str());

    let (status, _, body) = send(&app.router, get(&format!("/hal/ask/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body)
        .unwrap()
        .contains("const basePath = \"/hal\";"));
}

#[tokio::test]
async fn test_unknown_route_is_404_json() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), None).await;

    let (status, _, body) = send(&app.router, get("/nothing/here")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "Not found");
}
