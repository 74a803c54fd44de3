//! 主备协调
//!
//! 主权以协调存储中namespace键的归属表达，键绑定lease。竞选在命名锁内
//! 完成读-查-写，避免两个节点同时通过空检查。leader周期续约，续约失败
//! 先尝试一次重连重竞选，仍失败则触发致命处理（默认退出进程，让备节点
//! 接管，绝不双主）。备节点watch该键，键消失即重新竞选。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use taskmaster_core::config::HaConfig;
use taskmaster_core::traits::{
    CoordinationConnector, CoordinationService, LeaseId, WatchEvent,
};
use taskmaster_core::{SchedulerError, SchedulerResult};

/// 续约连失败后的兜底动作，测试中注入记录器代替退出
pub trait FatalHandler: Send + Sync {
    fn on_fatal(&self, reason: &str);
}

/// 默认兜底: 打日志后退出进程
pub struct ProcessExitHandler;

impl FatalHandler for ProcessExitHandler {
    fn on_fatal(&self, reason: &str) {
        error!("主权维持失败，进程退出: {}", reason);
        std::process::exit(1);
    }
}

pub struct HaCoordinator {
    config: HaConfig,
    /// 写入namespace键的本节点标识
    node_id: String,
    connector: Arc<dyn CoordinationConnector>,
    client: RwLock<Option<Arc<dyn CoordinationService>>>,
    lease: RwLock<Option<LeaseId>>,
    is_leader: RwLock<bool>,
    fatal: Arc<dyn FatalHandler>,
}

impl HaCoordinator {
    pub fn new(
        config: HaConfig,
        node_id: impl Into<String>,
        connector: Arc<dyn CoordinationConnector>,
    ) -> Self {
        Self {
            config,
            node_id: node_id.into(),
            connector,
            client: RwLock::new(None),
            lease: RwLock::new(None),
            is_leader: RwLock::new(false),
            fatal: Arc::new(ProcessExitHandler),
        }
    }

    pub fn with_fatal_handler(mut self, fatal: Arc<dyn FatalHandler>) -> Self {
        self.fatal = fatal;
        self
    }

    pub async fn is_leader(&self) -> bool {
        *self.is_leader.read().await
    }

    fn lock_key(&self) -> String {
        format!("{}/lock", self.config.namespace)
    }

    async fn client(&self) -> SchedulerResult<Arc<dyn CoordinationService>> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| SchedulerError::coordination_error("协调服务尚未连接"))
    }

    /// 遍历候选端点，找到可用节点后改连当前leader端点
    pub async fn setup_server(&self) -> SchedulerResult<()> {
        for endpoint in &self.config.endpoints {
            let candidate = match self.connector.connect(endpoint).await {
                Ok(client) => client,
                Err(e) => {
                    warn!("协调服务端点不可用: {} ({})", endpoint, e);
                    continue;
                }
            };
            let status = match candidate.status().await {
                Ok(status) => status,
                Err(e) => {
                    warn!("协调服务端点状态查询失败: {} ({})", endpoint, e);
                    continue;
                }
            };
            let client = if status.leader_endpoint == *endpoint {
                candidate
            } else {
                self.connector.connect(&status.leader_endpoint).await?
            };
            info!("协调服务已连接: leader={}", status.leader_endpoint);
            *self.client.write().await = Some(client);
            return Ok(());
        }
        Err(SchedulerError::coordination_error(
            "所有协调服务端点均不可用",
        ))
    }

    /// 竞选一次: 锁内读-查-写，键空则占有，返回是否当选
    pub async fn try_acquire(&self) -> SchedulerResult<bool> {
        let client = self.client().await?;
        let _guard = client.lock(&self.lock_key()).await?;
        match client.get(&self.config.namespace).await? {
            Some(owner) if owner != self.node_id => {
                info!("主权已被占有: owner={}", owner);
                Ok(false)
            }
            _ => {
                let lease = client.grant_lease(self.config.lease_ttl_seconds).await?;
                client
                    .put(&self.config.namespace, &self.node_id, Some(lease))
                    .await?;
                *self.lease.write().await = Some(lease);
                *self.is_leader.write().await = true;
                info!("当选leader: node={} lease={}", self.node_id, lease);
                Ok(true)
            }
        }
    }

    /// 阻塞竞选: 未当选则watch主权键，键消失后重试，直到当选
    pub async fn campaign(&self) -> SchedulerResult<()> {
        self.setup_server().await?;
        loop {
            if self.try_acquire().await? {
                return Ok(());
            }
            info!("进入standby，等待主权键释放");
            self.wait_for_vacancy().await?;
        }
    }

    async fn wait_for_vacancy(&self) -> SchedulerResult<()> {
        let client = self.client().await?;
        let mut events = client.watch(&self.config.namespace).await?;
        // 订阅后补查一次，避免键在订阅前已被删除
        if client.get(&self.config.namespace).await?.is_none() {
            return Ok(());
        }
        loop {
            match events.recv().await {
                Some(WatchEvent::Delete { .. }) => {
                    info!("主权键已释放");
                    return Ok(());
                }
                Some(WatchEvent::Put { .. }) => continue,
                None => {
                    return Err(SchedulerError::coordination_error("watch通道意外关闭"));
                }
            }
        }
    }

    /// 续约失败后的恢复: 重连并重竞选一次，失败即致命
    async fn recover_or_die(&self) {
        *self.is_leader.write().await = false;
        *self.lease.write().await = None;
        let recovered = match self.setup_server().await {
            Ok(()) => self.try_acquire().await.unwrap_or(false),
            Err(_) => false,
        };
        if recovered {
            warn!("续约中断后重新当选，继续服务");
        } else {
            self.fatal.on_fatal("lease续约失败且重竞选未当选");
        }
    }

    /// 启动续约循环，周期为ttl/3；收到停机信号时优雅让出主权
    pub fn spawn_keepalive(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let period = Duration::from_secs((self.config.lease_ttl_seconds as u64 / 3).max(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {
                        let lease = *self.lease.read().await;
                        let Some(lease) = lease else {
                            continue;
                        };
                        let alive = match self.client().await {
                            Ok(client) => client.keep_alive(lease).await.unwrap_or(false),
                            Err(_) => false,
                        };
                        if !alive {
                            warn!("lease {} 续约失败", lease);
                            self.recover_or_die().await;
                        }
                    }
                    _ = shutdown.recv() => {
                        if let Err(e) = self.resign().await {
                            warn!("停机让出主权失败: {}", e);
                        }
                        break;
                    }
                }
            }
        })
    }

    /// 主动让出主权: 删除主权键，备节点的watch会立刻收到Delete
    pub async fn resign(&self) -> SchedulerResult<()> {
        if !*self.is_leader.read().await {
            return Ok(());
        }
        *self.is_leader.write().await = false;
        *self.lease.write().await = None;
        let client = self.client().await?;
        client.delete(&self.config.namespace).await?;
        info!("已让出主权: node={}", self.node_id);
        Ok(())
    }
}
