use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务状态机
///
/// 合法转换: Pending -> Running -> 终态；RunningTimeout -> Pending 仅由
/// 调度超时清扫触发（重新入队），Worker回调不允许产生该转换。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Success,
    Fail,
    DownloadFail,
    RunningTimeout,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Success
                | TaskState::Fail
                | TaskState::DownloadFail
                | TaskState::RunningTimeout
        )
    }

    /// 状态单调性检查，终态之间不允许互相覆盖
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match (self, next) {
            (TaskState::Pending, TaskState::Running) => true,
            // 下载失败可以在投递前发生
            (TaskState::Pending, TaskState::DownloadFail) => true,
            (TaskState::Running, s) if s.is_terminal() => true,
            // 重新入队，只有超时清扫走这条边
            (TaskState::RunningTimeout, TaskState::Pending) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Success => "SUCCESS",
            TaskState::Fail => "FAIL",
            TaskState::DownloadFail => "DOWNLOAD_FAIL",
            TaskState::RunningTimeout => "RUNNING_TIMEOUT",
        }
    }

    pub fn parse(s: &str) -> Option<TaskState> {
        match s {
            "PENDING" => Some(TaskState::Pending),
            "RUNNING" => Some(TaskState::Running),
            "SUCCESS" => Some(TaskState::Success),
            "FAIL" => Some(TaskState::Fail),
            "DOWNLOAD_FAIL" => Some(TaskState::DownloadFail),
            "RUNNING_TIMEOUT" => Some(TaskState::RunningTimeout),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    /// 所属任务组id，同时是脚本制品的缓存键
    pub job_id: String,
    pub worker_id: Option<String>,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub done_time: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            worker_id: None,
            state: TaskState::Pending,
            created_at: Utc::now(),
            done_time: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_assigned(&self) -> bool {
        self.worker_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Running));
        assert!(TaskState::Running.can_transition_to(TaskState::Success));
        assert!(TaskState::Running.can_transition_to(TaskState::Fail));
        assert!(TaskState::Running.can_transition_to(TaskState::RunningTimeout));
        assert!(TaskState::Pending.can_transition_to(TaskState::DownloadFail));
        assert!(TaskState::RunningTimeout.can_transition_to(TaskState::Pending));
    }

    #[test]
    fn test_illegal_transitions() {
        // 终态之间不允许互相覆盖
        assert!(!TaskState::Success.can_transition_to(TaskState::Fail));
        assert!(!TaskState::Fail.can_transition_to(TaskState::Success));
        assert!(!TaskState::DownloadFail.can_transition_to(TaskState::Pending));
        // 回退到Pending只允许从RunningTimeout
        assert!(!TaskState::Running.can_transition_to(TaskState::Pending));
        assert!(!TaskState::Success.can_transition_to(TaskState::Pending));
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Success,
            TaskState::Fail,
            TaskState::DownloadFail,
            TaskState::RunningTimeout,
        ] {
            assert_eq!(TaskState::parse(state.as_str()), Some(state));
        }
        assert_eq!(TaskState::parse("UNKNOWN"), None);
    }

    #[test]
    fn test_new_task_is_pending_unassigned() {
        let task = Task::new("g1");
        assert_eq!(task.state, TaskState::Pending);
        assert!(!task.is_assigned());
        assert!(!task.is_terminal());
    }
}
