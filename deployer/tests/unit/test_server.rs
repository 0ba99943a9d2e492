//! Operator API tests

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use crmdeploy::deploy::{DeploymentEngine, EventKind, ProgressEvent};
use crmdeploy::dispatch::Dispatcher;
use crmdeploy::models::configuration::DeploymentConfiguration;
use crmdeploy::models::{DeploymentId, Progress};
use crmdeploy::remote::FakeCrm;
use crmdeploy::server::{router, ServerState};
use crmdeploy::storage::DeploymentStore;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::common::{engine, fields, request, TOKEN};

fn app(engine: DeploymentEngine) -> Router {
    router(Arc::new(ServerState::new(
        engine,
        Arc::new(Dispatcher::default()),
    )))
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn call_json(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = call(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn configuration() -> DeploymentConfiguration {
    DeploymentConfiguration {
        properties: fields(2),
        ..Default::default()
    }
}

/// An engine holding one deployment that already completed
async fn completed() -> (DeploymentEngine, DeploymentId) {
    let engine = engine(Arc::new(FakeCrm::new()));
    let (deployment, credential) = engine.admit(request(configuration())).await.unwrap();
    engine.execute(deployment.id, credential).await.unwrap();
    (engine, deployment.id)
}

#[tokio::test]
async fn test_health() {
    let app = app(engine(Arc::new(FakeCrm::new())));
    let (status, body) = call_json(app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "crmdeploy");
}

#[tokio::test]
async fn test_submit_is_accepted() {
    let app = app(engine(Arc::new(FakeCrm::new())));
    let body = json!({
        "client_name": "Acme Corp",
        "access_token": TOKEN,
        "configuration": configuration(),
    });

    let (status, body) = call_json(app, post("/deployments", &body)).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    assert!(body["deployment_id"].as_str().is_some());
}

#[tokio::test]
async fn test_submit_rejections() {
    let engine = engine(Arc::new(FakeCrm::new()));

    let malformed = Request::builder()
        .method("POST")
        .uri("/deployments")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let (status, body) = call_json(app(engine.clone()), malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "configuration_invalid");

    let blank_token = json!({
        "client_name": "Acme Corp",
        "access_token": "",
        "configuration": configuration(),
    });
    let (status, body) = call_json(app(engine.clone()), post("/deployments", &blank_token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "credential_invalid");

    let nothing_declared = json!({
        "client_name": "Acme Corp",
        "access_token": TOKEN,
        "configuration": {},
    });
    let (status, body) = call_json(app(engine.clone()), post("/deployments", &nothing_declared)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "configuration_invalid");

    let page = engine
        .store()
        .list(&Default::default())
        .await
        .unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_unknown_deployment_is_not_found() {
    let app = app(engine(Arc::new(FakeCrm::new())));
    let uri = format!("/deployments/{}", DeploymentId::generate());
    let (status, body) = call_json(app, get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_get_list_and_logs() {
    let (engine, id) = completed().await;

    let (status, body) = call_json(app(engine.clone()), get(&format!("/deployments/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["created_entities"].as_array().unwrap().len(), 2);
    assert!(body["rate_limit"].is_object());
    assert!(body.get("access_token").is_none());

    let (status, body) = call_json(app(engine.clone()), get("/deployments?status=completed")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, body) = call_json(app(engine.clone()), get("/deployments?status=failed")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);

    let (status, body) = call_json(app(engine), get(&format!("/deployments/{id}/logs"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_rollback_of_completed_is_a_conflict() {
    let (engine, id) = completed().await;
    let body = json!({ "access_token": TOKEN });

    let (status, body) =
        call_json(app(engine), post(&format!("/deployments/{id}/rollback"), &body)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");
}

#[tokio::test]
async fn test_events_of_finished_deployment_end_after_snapshot() {
    let (engine, id) = completed().await;

    let (status, body) = call(app(engine), get(&format!("/deployments/{id}/events"))).await;

    assert_eq!(status, StatusCode::OK);
    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("event: completed"));
    assert!(body.contains("\"is_final\":true"));
}

#[tokio::test]
async fn test_lagging_observer_still_sees_the_end() {
    let engine = engine(Arc::new(FakeCrm::new()));
    let (deployment, credential) = engine.admit(request(configuration())).await.unwrap();
    let id = deployment.id;

    let response = app(engine.clone())
        .oneshot(get(&format!("/deployments/{id}/events")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    engine.execute(id, credential).await.unwrap();
    // enough traffic from another deployment to push the final event out of the buffer
    let other = DeploymentId::generate();
    for _ in 0..1100 {
        engine.hub().publish(ProgressEvent::new(
            other,
            EventKind::Progress,
            &Progress::new(1),
            None,
        ));
    }

    let body = tokio::time::timeout(
        Duration::from_secs(3),
        to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .expect("stream did not end")
    .unwrap();

    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.contains("event: started"));
    assert!(body.contains("event: completed"));
    assert!(body.contains("\"is_final\":true"));
}
