use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Worker资源快照，随心跳上报
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResourceSnapshot {
    pub cpu_free: f64,
    pub memory_free: u64,
    pub disk_read: u64,
    pub disk_write: u64,
    pub net_send: u64,
    pub net_recv: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub id: String,
    pub name: String,
    pub resources: ResourceSnapshot,
    pub running_tasks: i32,
    /// 最近一次心跳时间
    pub refresh_time: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            resources: ResourceSnapshot::default(),
            running_tasks: 0,
            refresh_time: now,
            registered_at: now,
        }
    }

    /// 活跃判定: now - refresh_time < worker_timeout
    pub fn is_alive(&self, now: DateTime<Utc>, timeout_seconds: i64) -> bool {
        now - self.refresh_time < Duration::seconds(timeout_seconds)
    }
}

/// Worker登录凭据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerCredential {
    pub name: String,
    pub password: String,
}
