//! 网关状态
//!
//! 下线名单与日志采集请求都是pull通道的一次性投递队列，归网关持有，
//! 随主进程生命周期存在，不落库。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use taskmaster_dispatcher::{Scheduler, WorkerFleetManager};

pub struct GatewayState {
    pub scheduler: Arc<Scheduler>,
    pub fleet: Arc<WorkerFleetManager>,
    /// 待下线Worker集合，pull时转为shutdown命令并移除
    offline_workers: RwLock<HashSet<String>>,
    /// worker_id -> 待采集日志的task id，pull时一次性带走
    log_requests: RwLock<HashMap<String, Vec<String>>>,
}

pub type AppState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(scheduler: Arc<Scheduler>, fleet: Arc<WorkerFleetManager>) -> AppState {
        Arc::new(Self {
            scheduler,
            fleet,
            offline_workers: RwLock::new(HashSet::new()),
            log_requests: RwLock::new(HashMap::new()),
        })
    }

    pub async fn mark_offline(&self, worker_id: &str) {
        self.offline_workers
            .write()
            .await
            .insert(worker_id.to_string());
    }

    /// 取走下线标记，返回该Worker是否被要求下线
    pub async fn take_offline(&self, worker_id: &str) -> bool {
        self.offline_workers.write().await.remove(worker_id)
    }

    pub async fn request_log(&self, worker_id: &str, task_id: &str) {
        self.log_requests
            .write()
            .await
            .entry(worker_id.to_string())
            .or_default()
            .push(task_id.to_string());
    }

    pub async fn drain_log_requests(&self, worker_id: &str) -> Vec<String> {
        self.log_requests
            .write()
            .await
            .remove(worker_id)
            .unwrap_or_default()
    }
}
