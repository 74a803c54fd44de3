use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务组: 一次提交的命名工作单元，平铺展开为fanout个任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobGroup {
    pub id: String,
    pub name: String,
    /// 制品库中的脚本文件名，Worker按job_id目录缓存
    pub script: String,
    /// 展开的任务数量
    pub fanout: u32,
    /// 单次执行时长上限（秒），缺省时用master.task_timeout_seconds
    #[serde(default)]
    pub running_timeout_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl JobGroup {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        script: impl Into<String>,
        fanout: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            script: script.into(),
            fanout,
            running_timeout_seconds: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_running_timeout(mut self, seconds: i64) -> Self {
        self.running_timeout_seconds = Some(seconds);
        self
    }
}

/// 任务组运行期视图，供运维接口查询
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGroupView {
    pub job_id: String,
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub finished: usize,
}
