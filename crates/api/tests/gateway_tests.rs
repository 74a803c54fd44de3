//! 网关端到端测试: 走真实路由与信封，存储用内存mock

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use taskmaster_api::{create_router, GatewayState};
use taskmaster_core::config::MasterConfig;
use taskmaster_core::models::WorkerCredential;
use taskmaster_dispatcher::{Scheduler, WorkerFleetManager};
use taskmaster_testing_utils::mocks::MockJobStore;

fn gateway() -> Router {
    let fleet = Arc::new(WorkerFleetManager::new(
        vec![WorkerCredential {
            name: "node".to_string(),
            password: "secret".to_string(),
        }],
        20,
    ));
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(MockJobStore::new()),
        Arc::clone(&fleet),
        taskmaster_dispatcher::create_rule("least_loaded").unwrap(),
        MasterConfig::default(),
    ));
    create_router(GatewayState::new(scheduler, fleet))
}

async fn post_json(router: &Router, path: &str, body: serde_json::Value) -> serde_json::Value {
    let response = router
        .clone()
        .oneshot(
            Request::post(path)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get_json(router: &Router, path: &str) -> serde_json::Value {
    let response = router
        .clone()
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn login(router: &Router) -> String {
    let resp = post_json(
        router,
        "/api/worker/login",
        serde_json::json!({"name": "node", "password": "secret", "worker_id": ""}),
    )
    .await;
    assert_eq!(resp["code"], "SUCCESS");
    resp["content"]["worker_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_login_failure_is_fail_envelope_with_http_200() {
    let router = gateway();
    let resp = post_json(
        &router,
        "/api/worker/login",
        serde_json::json!({"name": "node", "password": "wrong", "worker_id": ""}),
    )
    .await;
    assert_eq!(resp["code"], "FAIL");
    assert!(resp["content"].as_str().unwrap().contains("凭据"));
}

#[tokio::test]
async fn test_task_delivery_through_pull_channel() {
    let router = gateway();
    let worker_id = login(&router).await;

    let resp = post_json(
        &router,
        "/api/job_group/add",
        serde_json::json!({"id": "g1", "name": "nightly", "script": "run.sh", "fanout": 2}),
    )
    .await;
    assert_eq!(resp["code"], "SUCCESS");

    // 任务尚未被调度循环分配，拉取为空
    let resp = post_json(
        &router,
        "/api/worker/pull",
        serde_json::json!({"worker_id": worker_id}),
    )
    .await;
    assert_eq!(resp["content"]["tasks"].as_array().unwrap().len(), 0);

    let views = get_json(&router, "/api/job_group/views").await;
    assert_eq!(views["content"][0]["total"], 2);
    assert_eq!(views["content"][0]["pending"], 2);
}

#[tokio::test]
async fn test_unknown_worker_pull_is_benign() {
    let router = gateway();
    let resp = post_json(
        &router,
        "/api/worker/pull",
        serde_json::json!({"worker_id": "ghost"}),
    )
    .await;
    assert_eq!(resp["code"], "SUCCESS");
    assert!(resp["content"]["tasks"].as_array().unwrap().is_empty());
    assert!(resp["content"].get("cmd").is_none());
}

#[tokio::test]
async fn test_heartbeat_reports_known_flag() {
    let router = gateway();
    let worker_id = login(&router).await;

    let resp = post_json(
        &router,
        "/api/worker/heartbeat",
        serde_json::json!({
            "worker_id": worker_id,
            "resources": {
                "cpu_free": 0.5, "memory_free": 1024,
                "disk_read": 0, "disk_write": 0, "net_send": 0, "net_recv": 0
            },
            "running_tasks": 1
        }),
    )
    .await;
    assert_eq!(resp["content"]["known"], true);

    let resp = post_json(
        &router,
        "/api/worker/heartbeat",
        serde_json::json!({
            "worker_id": "ghost",
            "resources": {
                "cpu_free": 0.0, "memory_free": 0,
                "disk_read": 0, "disk_write": 0, "net_send": 0, "net_recv": 0
            },
            "running_tasks": 0
        }),
    )
    .await;
    assert_eq!(resp["content"]["known"], false);
}

#[tokio::test]
async fn test_shutdown_command_delivered_once() {
    let router = gateway();
    let worker_id = login(&router).await;

    post_json(
        &router,
        "/api/worker/shutdown",
        serde_json::json!({"workers": [worker_id]}),
    )
    .await;

    let resp = post_json(
        &router,
        "/api/worker/pull",
        serde_json::json!({"worker_id": worker_id}),
    )
    .await;
    assert_eq!(resp["content"]["cmd"], "shutdown");

    // 一次性投递，再拉取不重复下发
    let resp = post_json(
        &router,
        "/api/worker/pull",
        serde_json::json!({"worker_id": worker_id}),
    )
    .await;
    assert!(resp["content"].get("cmd").is_none());
}

#[tokio::test]
async fn test_task_callback_for_unknown_task_fails() {
    let router = gateway();
    let worker_id = login(&router).await;
    let resp = post_json(
        &router,
        "/api/worker/task_callback",
        serde_json::json!({
            "task_id": "ghost",
            "worker_id": worker_id,
            "state": "SUCCESS",
            "done_time": chrono::Utc::now().to_rfc3339()
        }),
    )
    .await;
    assert_eq!(resp["code"], "FAIL");
}

#[tokio::test]
async fn test_get_missing_task_fails() {
    let router = gateway();
    let resp = get_json(&router, "/api/task/ghost").await;
    assert_eq!(resp["code"], "FAIL");
}
