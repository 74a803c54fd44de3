//! Heartbeat reporting.
//!
//! Sends a resource snapshot on a fixed interval. When the master
//! answers `known=false` (typically after a failover or a liveness
//! eviction) the reporter logs in again with the same worker id.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use taskmaster_core::config::WorkerProcessConfig;
use taskmaster_core::models::{HeartbeatRequest, ResourceSnapshot};

use crate::executor::TaskExecutor;
use crate::master_client::MasterClient;

/// Best-effort resource probe; on failure the snapshot stays zeroed,
/// the master only uses it for placement hints.
pub fn probe_resources() -> ResourceSnapshot {
    let mut snapshot = ResourceSnapshot::default();
    #[cfg(target_os = "linux")]
    {
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            for line in meminfo.lines() {
                if let Some(rest) = line.strip_prefix("MemAvailable:") {
                    if let Some(kb) = rest.split_whitespace().next() {
                        snapshot.memory_free = kb.parse::<u64>().unwrap_or(0) * 1024;
                    }
                    break;
                }
            }
        }
        if let Ok(loadavg) = std::fs::read_to_string("/proc/loadavg") {
            if let Some(load) = loadavg.split_whitespace().next() {
                let cores = std::thread::available_parallelism()
                    .map(|n| n.get() as f64)
                    .unwrap_or(1.0);
                let load = load.parse::<f64>().unwrap_or(cores);
                snapshot.cpu_free = (1.0 - load / cores).max(0.0);
            }
        }
    }
    snapshot
}

pub struct HeartbeatReporter {
    client: Arc<MasterClient>,
    executor: Arc<TaskExecutor>,
    config: WorkerProcessConfig,
    worker_id: String,
}

impl HeartbeatReporter {
    pub fn new(
        client: Arc<MasterClient>,
        executor: Arc<TaskExecutor>,
        config: WorkerProcessConfig,
        worker_id: String,
    ) -> Self {
        Self {
            client,
            executor,
            config,
            worker_id,
        }
    }

    async fn beat_once(&self) {
        let req = HeartbeatRequest {
            worker_id: self.worker_id.clone(),
            resources: probe_resources(),
            running_tasks: self.executor.running_tasks(),
        };
        match self.client.heartbeat(&req).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("master does not know us, logging in again");
                match self
                    .client
                    .login(&self.config.name, &self.config.password, &self.worker_id)
                    .await
                {
                    Ok(id) => info!("re-login ok, worker_id={}", id),
                    Err(e) => warn!("re-login failed: {}", e),
                }
            }
            Err(e) => warn!("heartbeat failed: {}", e),
        }
    }

    pub fn start(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(self.config.heartbeat_interval_seconds));
            info!(
                "heartbeat loop started, interval={}s",
                self.config.heartbeat_interval_seconds
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.beat_once().await,
                    _ = shutdown.recv() => {
                        info!("heartbeat loop stopping");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_resources_never_panics() {
        let snapshot = probe_resources();
        assert!(snapshot.cpu_free >= 0.0);
    }
}
