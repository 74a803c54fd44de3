use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("任务组未找到: {id}")]
    JobGroupNotFound { id: String },
    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },
    #[error("认证失败: {0}")]
    Authentication(String),
    #[error("非法的任务状态转换: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
    #[error("任务状态冲突: 任务 {task_id} 已处于终态 {current}，拒绝转换到 {requested}")]
    TerminalStateConflict {
        task_id: String,
        current: String,
        requested: String,
    },
    #[error("制品存储错误: 权限不足: {0}")]
    ArtifactPermissionDenied(String),
    #[error("制品存储错误: 已存在: {0}")]
    ArtifactAlreadyExists(String),
    #[error("制品存储错误: 未找到: {0}")]
    ArtifactNotFound(String),
    #[error("制品存储错误: {0}")]
    ArtifactStore(String),
    #[error("协调服务错误: {0}")]
    Coordination(String),
    #[error("失去领导权")]
    LeadershipLost,
    #[error("任务执行错误: {0}")]
    TaskExecution(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }
    pub fn worker_not_found<S: Into<String>>(id: S) -> Self {
        Self::WorkerNotFound { id: id.into() }
    }
    pub fn job_group_not_found<S: Into<String>>(id: S) -> Self {
        Self::JobGroupNotFound { id: id.into() }
    }
    pub fn auth_error<S: Into<String>>(msg: S) -> Self {
        Self::Authentication(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn coordination_error<S: Into<String>>(msg: S) -> Self {
        Self::Coordination(msg.into())
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::DatabaseOperation(_)
                | SchedulerError::Coordination(_)
                | SchedulerError::Network(_)
                | SchedulerError::Timeout(_)
        )
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::Internal(_) | SchedulerError::Configuration(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SchedulerError::Network("连接被拒绝".to_string()).is_retryable());
        assert!(SchedulerError::Coordination("lease丢失".to_string()).is_retryable());
        assert!(!SchedulerError::Authentication("密码错误".to_string()).is_retryable());
        assert!(!SchedulerError::task_not_found("t1").is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SchedulerError::TerminalStateConflict {
            task_id: "t1".to_string(),
            current: "SUCCESS".to_string(),
            requested: "FAIL".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("t1"));
        assert!(msg.contains("SUCCESS"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: SchedulerError = json_err.into();
        assert!(matches!(err, SchedulerError::Serialization(_)));
    }
}
