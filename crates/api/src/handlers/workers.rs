//! Worker通道端点: 登录、心跳、拉取与回调

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use taskmaster_core::models::{
    HeartbeatRequest, LoginRequest, PullResponse, RegisterRequest, TaskCallbackRequest,
    WorkerCommand,
};

use crate::response::{envelope, RpcResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WorkerIdRequest {
    pub worker_id: String,
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> RpcResponse {
    envelope(
        state
            .fleet
            .login(&req)
            .await
            .map(|worker_id| serde_json::json!({ "worker_id": worker_id })),
    )
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> RpcResponse {
    envelope(state.fleet.register(&req).await)
}

pub async fn logout(
    State(state): State<AppState>,
    Json(req): Json<WorkerIdRequest>,
) -> RpcResponse {
    let removed = state.fleet.logout(&req.worker_id).await;
    RpcResponse::success(serde_json::json!({ "removed": removed }))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> RpcResponse {
    // false表示Worker需要重新login，不算错误
    let known = state.fleet.heartbeat(&req).await;
    RpcResponse::success(serde_json::json!({ "known": known }))
}

/// 合并投递: 新任务、取消命令、日志采集请求与下线命令一次带走
///
/// 未登录Worker的拉取返回空响应，由心跳的known=false引导其重新登录。
pub async fn pull(State(state): State<AppState>, Json(req): Json<WorkerIdRequest>) -> RpcResponse {
    if !state.fleet.contains(&req.worker_id).await {
        debug!("未登录Worker拉取，返回空响应: id={}", req.worker_id);
        return RpcResponse::success(PullResponse::default());
    }
    let (tasks, cancels) = match state.scheduler.pull_tasks(&req.worker_id).await {
        Ok(result) => result,
        Err(err) => return envelope::<()>(Err(err)),
    };
    let log_requests = state.drain_log_requests(&req.worker_id).await;
    let cmd = if state.take_offline(&req.worker_id).await {
        Some(WorkerCommand::Shutdown)
    } else {
        None
    };
    RpcResponse::success(PullResponse {
        tasks,
        cancels,
        log_requests,
        cmd,
    })
}

pub async fn task_callback(
    State(state): State<AppState>,
    Json(req): Json<TaskCallbackRequest>,
) -> RpcResponse {
    envelope(state.scheduler.task_callback(&req).await)
}
