//! 运维端点: 任务组管理、机群查询与下线控制

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use taskmaster_core::models::{JobGroup, ShutdownWorkersRequest};
use taskmaster_core::SchedulerError;

use crate::response::{envelope, RpcResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddJobGroupRequest {
    pub id: String,
    pub name: String,
    pub script: String,
    #[serde(default = "default_fanout")]
    pub fanout: u32,
    /// 单次执行时长上限（秒），缺省用master.task_timeout_seconds
    #[serde(default)]
    pub running_timeout_seconds: Option<i64>,
}

fn default_fanout() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct DeleteJobGroupRequest {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct AddLogRequest {
    pub task_id: String,
}

pub async fn add_job_group(
    State(state): State<AppState>,
    Json(req): Json<AddJobGroupRequest>,
) -> RpcResponse {
    let group = build_group(&req);
    envelope(state.scheduler.add_job_group(&group).await)
}

fn build_group(req: &AddJobGroupRequest) -> JobGroup {
    let mut group = JobGroup::new(&req.id, &req.name, &req.script, req.fanout);
    group.running_timeout_seconds = req.running_timeout_seconds;
    group
}

/// 先删后建，任务组整体重跑
pub async fn apply_job_group(
    State(state): State<AppState>,
    Json(req): Json<AddJobGroupRequest>,
) -> RpcResponse {
    let group = build_group(&req);
    envelope(state.scheduler.apply_job_group(&group).await)
}

pub async fn delete_job_group(
    State(state): State<AppState>,
    Json(req): Json<DeleteJobGroupRequest>,
) -> RpcResponse {
    envelope(state.scheduler.delete_job_group(&req.id).await)
}

pub async fn list_job_groups(State(state): State<AppState>) -> RpcResponse {
    envelope(state.scheduler.list_job_groups().await)
}

pub async fn alive_job_groups(State(state): State<AppState>) -> RpcResponse {
    envelope(state.scheduler.alive_job_groups().await)
}

pub async fn task_group_views(State(state): State<AppState>) -> RpcResponse {
    envelope(state.scheduler.task_group_views().await)
}

pub async fn get_task(State(state): State<AppState>, Path(task_id): Path<String>) -> RpcResponse {
    let result = state.scheduler.get_task(&task_id).await.and_then(|task| {
        task.ok_or_else(|| SchedulerError::task_not_found(&task_id))
    });
    envelope(result)
}

pub async fn alive_tasks(State(state): State<AppState>) -> RpcResponse {
    envelope(state.scheduler.alive_tasks().await)
}

pub async fn pending_tasks(State(state): State<AppState>) -> RpcResponse {
    envelope(state.scheduler.pending_tasks().await)
}

pub async fn list_workers(State(state): State<AppState>) -> RpcResponse {
    RpcResponse::success(state.fleet.get_workers().await)
}

/// 请求采集任务的执行日志，任务所在Worker下次pull时带走
pub async fn add_log(State(state): State<AppState>, Json(req): Json<AddLogRequest>) -> RpcResponse {
    let task = match state.scheduler.get_task(&req.task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => return envelope::<()>(Err(SchedulerError::task_not_found(&req.task_id))),
        Err(err) => return envelope::<()>(Err(err)),
    };
    match task.worker_id {
        Some(worker_id) if state.fleet.contains(&worker_id).await => {
            state.request_log(&worker_id, &req.task_id).await;
            RpcResponse::success(serde_json::json!({ "worker_id": worker_id }))
        }
        Some(worker_id) => envelope::<()>(Err(SchedulerError::worker_not_found(worker_id))),
        None => envelope::<()>(Err(SchedulerError::TaskExecution(format!(
            "任务{}未分配Worker，无日志可采集",
            req.task_id
        )))),
    }
}

/// 标记Worker下线，下次pull时下发shutdown命令
pub async fn shutdown_workers(
    State(state): State<AppState>,
    Json(req): Json<ShutdownWorkersRequest>,
) -> RpcResponse {
    for worker_id in &req.workers {
        info!("标记Worker下线: id={}", worker_id);
        state.mark_offline(worker_id).await;
    }
    RpcResponse::success(serde_json::json!({ "marked": req.workers.len() }))
}
