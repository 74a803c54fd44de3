//! Worker机群管理
//!
//! 负责凭据登录、注册、心跳刷新与存活清扫。心跳超时的Worker会被移出
//! 机群，并通过移除回调通知调度器回收其任务。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use taskmaster_core::models::{
    HeartbeatRequest, LoginRequest, RegisterRequest, Worker, WorkerCredential,
};
use taskmaster_core::{SchedulerError, SchedulerResult};

/// Worker被判死移除时的回调，调度器借此回收该Worker上的任务
#[async_trait]
pub trait WorkerRemovalListener: Send + Sync {
    async fn on_worker_removed(&self, worker_id: &str);
}

pub struct WorkerFleetManager {
    credentials: RwLock<Vec<WorkerCredential>>,
    workers: RwLock<HashMap<String, Worker>>,
    worker_timeout_seconds: i64,
    running: RwLock<bool>,
}

impl WorkerFleetManager {
    pub fn new(credentials: Vec<WorkerCredential>, worker_timeout_seconds: u64) -> Self {
        Self {
            credentials: RwLock::new(credentials),
            workers: RwLock::new(HashMap::new()),
            worker_timeout_seconds: worker_timeout_seconds as i64,
            running: RwLock::new(false),
        }
    }

    /// 凭据登录，成功后Worker进入机群并返回worker_id
    ///
    /// 请求未携带worker_id时分配新id，携带时复用（Worker重启重连场景）。
    pub async fn login(&self, req: &LoginRequest) -> SchedulerResult<String> {
        let authorized = self
            .credentials
            .read()
            .await
            .iter()
            .any(|c| c.name == req.name && c.password == req.password);
        if !authorized {
            warn!("Worker登录失败: name={}", req.name);
            return Err(SchedulerError::auth_error(format!(
                "凭据校验失败: {}",
                req.name
            )));
        }

        let worker_id = if req.worker_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            req.worker_id.clone()
        };
        let mut workers = self.workers.write().await;
        let worker = workers
            .entry(worker_id.clone())
            .or_insert_with(|| Worker::new(worker_id.clone(), req.name.clone()));
        worker.refresh_time = Utc::now();
        info!("Worker登录成功: id={} name={}", worker_id, req.name);
        Ok(worker_id)
    }

    /// 注册新凭据，名称已占用时拒绝
    pub async fn register(&self, req: &RegisterRequest) -> SchedulerResult<()> {
        let mut credentials = self.credentials.write().await;
        if credentials.iter().any(|c| c.name == req.name) {
            return Err(SchedulerError::auth_error(format!(
                "Worker名称已注册: {}",
                req.name
            )));
        }
        credentials.push(WorkerCredential {
            name: req.name.clone(),
            password: req.password.clone(),
        });
        info!("注册Worker凭据: name={}", req.name);
        Ok(())
    }

    /// 主动下线，返回该Worker此前是否在机群中
    pub async fn logout(&self, worker_id: &str) -> bool {
        let removed = self.workers.write().await.remove(worker_id).is_some();
        if removed {
            info!("Worker登出: id={}", worker_id);
        }
        removed
    }

    /// 心跳刷新，未登录的Worker返回false（需要重新login）
    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> bool {
        let mut workers = self.workers.write().await;
        match workers.get_mut(&req.worker_id) {
            Some(worker) => {
                worker.resources = req.resources.clone();
                worker.running_tasks = req.running_tasks;
                worker.refresh_time = Utc::now();
                true
            }
            None => {
                debug!("收到未登录Worker的心跳: id={}", req.worker_id);
                false
            }
        }
    }

    pub async fn get_worker(&self, worker_id: &str) -> Option<Worker> {
        self.workers.read().await.get(worker_id).cloned()
    }

    pub async fn get_workers(&self) -> Vec<Worker> {
        self.workers.read().await.values().cloned().collect()
    }

    pub async fn contains(&self, worker_id: &str) -> bool {
        self.workers.read().await.contains_key(worker_id)
    }

    /// 活跃Worker快照: now - refresh_time < worker_timeout
    pub async fn alive_workers(&self) -> Vec<Worker> {
        let now = Utc::now();
        self.workers
            .read()
            .await
            .values()
            .filter(|w| w.is_alive(now, self.worker_timeout_seconds))
            .cloned()
            .collect()
    }

    /// 清扫一轮: 移除心跳超时的Worker并逐个通知回调，返回移除数量
    pub async fn sweep_once(&self, listener: &Arc<dyn WorkerRemovalListener>) -> usize {
        let now = Utc::now();
        let dead: Vec<String> = {
            let workers = self.workers.read().await;
            workers
                .values()
                .filter(|w| !w.is_alive(now, self.worker_timeout_seconds))
                .map(|w| w.id.clone())
                .collect()
        };
        if dead.is_empty() {
            return 0;
        }
        {
            let mut workers = self.workers.write().await;
            for id in &dead {
                workers.remove(id);
            }
        }
        for id in &dead {
            warn!("Worker心跳超时，移出机群: id={}", id);
            listener.on_worker_removed(id).await;
        }
        dead.len()
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// 启动存活清扫循环
    pub fn start(
        self: Arc<Self>,
        listener: Arc<dyn WorkerRemovalListener>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            *self.running.write().await = true;
            let period = Duration::from_secs((self.worker_timeout_seconds as u64 / 2).max(1));
            let mut ticker = tokio::time::interval(period);
            info!("Worker存活清扫循环启动，周期{:?}", period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !*self.running.read().await {
                            break;
                        }
                        self.sweep_once(&listener).await;
                    }
                    _ = shutdown.recv() => {
                        info!("Worker存活清扫循环收到停机信号");
                        break;
                    }
                }
            }
        })
    }
}
