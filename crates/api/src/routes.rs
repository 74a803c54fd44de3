//! 路由表

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, workers};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Worker通道
        .route("/api/worker/login", post(workers::login))
        .route("/api/worker/register", post(workers::register))
        .route("/api/worker/logout", post(workers::logout))
        .route("/api/worker/heartbeat", post(workers::heartbeat))
        .route("/api/worker/pull", post(workers::pull))
        .route("/api/worker/task_callback", post(workers::task_callback))
        // 运维通道
        .route("/api/worker/list", get(admin::list_workers))
        .route("/api/worker/shutdown", post(admin::shutdown_workers))
        .route("/api/job_group/add", post(admin::add_job_group))
        .route("/api/job_group/apply", post(admin::apply_job_group))
        .route("/api/job_group/delete", post(admin::delete_job_group))
        .route("/api/job_group/list", get(admin::list_job_groups))
        .route("/api/job_group/alive", get(admin::alive_job_groups))
        .route("/api/job_group/views", get(admin::task_group_views))
        .route("/api/task/{task_id}", get(admin::get_task))
        .route("/api/task/alive", get(admin::alive_tasks))
        .route("/api/task/pending", get(admin::pending_tasks))
        .route("/api/task/add_log", post(admin::add_log))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
