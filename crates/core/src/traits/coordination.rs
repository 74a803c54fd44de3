use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::SchedulerResult;

pub type LeaseId = i64;

/// 协调服务集群状态，用于发现当前leader端点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub leader_endpoint: String,
}

/// namespace键上的watch事件
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Put { key: String, value: String },
    Delete { key: String },
}

/// 持有期间互斥的分布式锁句柄，drop即释放
pub trait LockGuard: Send + Sync {}

/// 按端点建立协调服务连接
///
/// setup_server在候选端点间轮询时通过它重建客户端。
#[async_trait]
pub trait CoordinationConnector: Send + Sync {
    async fn connect(&self, endpoint: &str)
        -> SchedulerResult<std::sync::Arc<dyn CoordinationService>>;
}

/// 协调服务端口: lease、KV、分布式锁与watch
///
/// 主备选举依赖的全部外部能力都收敛在这个端口上。
#[async_trait]
pub trait CoordinationService: Send + Sync {
    async fn status(&self) -> SchedulerResult<ClusterStatus>;

    /// 创建一个ttl秒的lease
    async fn grant_lease(&self, ttl_seconds: i64) -> SchedulerResult<LeaseId>;

    /// 续约，lease已过期时返回false
    async fn keep_alive(&self, lease: LeaseId) -> SchedulerResult<bool>;

    /// 写入绑定lease的键值，lease过期后键自动消失
    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> SchedulerResult<()>;

    async fn get(&self, key: &str) -> SchedulerResult<Option<String>>;

    async fn delete(&self, key: &str) -> SchedulerResult<()>;

    /// 获取命名互斥锁，返回的句柄drop时释放
    async fn lock(&self, name: &str) -> SchedulerResult<Box<dyn LockGuard>>;

    /// 订阅键上的put/delete事件
    async fn watch(&self, key: &str) -> SchedulerResult<mpsc::Receiver<WatchEvent>>;
}
