use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ResourceSnapshot, TaskState};

/// pull通道下发的单个任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskAssignment {
    pub task_id: String,
    pub job_id: String,
    /// 制品库中的脚本文件名，Worker按job_id目录缓存下载
    pub script: String,
    pub state: TaskState,
}

/// Worker收到后需要执行的带外命令
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerCommand {
    Shutdown,
}

/// pull端点的合并响应: 任务投递、取消命令、日志采集请求与关机命令
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PullResponse {
    #[serde(default)]
    pub tasks: Vec<TaskAssignment>,
    /// 需要强杀的task id，一次性投递
    #[serde(default)]
    pub cancels: Vec<String>,
    /// 需要采集诊断日志的task id，一次性投递
    #[serde(default)]
    pub log_requests: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<WorkerCommand>,
}

impl PullResponse {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.cancels.is_empty()
            && self.log_requests.is_empty()
            && self.cmd.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub name: String,
    pub password: String,
    pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub resources: ResourceSnapshot,
    pub running_tasks: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCallbackRequest {
    pub task_id: String,
    pub worker_id: String,
    pub state: TaskState,
    pub done_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownWorkersRequest {
    pub workers: Vec<String>,
}
