//! master进程装配
//!
//! 按配置组装存储、机群、调度器与网关。HA开启时先竞选，当选后才开始
//! 对外服务，续约循环在后台维持主权。

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use taskmaster_api::{create_router, GatewayState};
use taskmaster_core::config::AppConfig;
use taskmaster_core::traits::JobStore;
use taskmaster_dispatcher::{
    create_rule, HaCoordinator, Scheduler, WorkerFleetManager, WorkerRemovalListener,
};
use taskmaster_infrastructure::{
    MemoryConnector, MemoryCoordination, MemoryJobStore, SqliteJobStore,
};

use crate::shutdown::ShutdownManager;

pub struct Application {
    config: AppConfig,
    scheduler: Arc<Scheduler>,
    fleet: Arc<WorkerFleetManager>,
    ha: Option<Arc<HaCoordinator>>,
}

impl Application {
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn JobStore> = if config.database.url.starts_with("sqlite") {
            Arc::new(
                SqliteJobStore::connect(&config.database.url)
                    .await
                    .context("连接任务存储失败")?,
            )
        } else {
            info!("未配置SQLite，使用内存任务存储");
            Arc::new(MemoryJobStore::new())
        };

        let fleet = Arc::new(WorkerFleetManager::new(
            config.credentials.clone(),
            config.master.worker_timeout_seconds,
        ));
        let rule = create_rule(&config.master.rule)?;
        let scheduler = Arc::new(Scheduler::new(
            store,
            Arc::clone(&fleet),
            rule,
            config.master.clone(),
        ));

        let ha = if config.ha.enabled {
            // 本构建的协调存储在进程内，主备互斥只在同一进程的实例之间
            // 成立。跨进程部署需要外部协调服务，这里直接拒绝以免两个
            // 副本各自为主。
            if let Some(foreign) = config
                .ha
                .endpoints
                .iter()
                .find(|e| !e.starts_with("memory://"))
            {
                anyhow::bail!(
                    "ha.endpoints包含非memory://端点{foreign}，\
                     本构建的协调服务为进程内存储，不提供跨进程互斥"
                );
            }
            warn!("HA使用进程内协调存储，互斥范围仅限本进程");
            let endpoint = config
                .ha
                .endpoints
                .first()
                .cloned()
                .unwrap_or_else(|| "memory://local".to_string());
            let connector = Arc::new(MemoryConnector::new(MemoryCoordination::new(endpoint)));
            let node_id = format!(
                "{}:{}",
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "unknown".to_string()),
                config.master.port
            );
            Some(Arc::new(HaCoordinator::new(
                config.ha.clone(),
                node_id,
                connector,
            )))
        } else {
            None
        };

        Ok(Self {
            config,
            scheduler,
            fleet,
            ha,
        })
    }

    pub async fn run(self, shutdown: ShutdownManager) -> anyhow::Result<()> {
        if let Some(ha) = &self.ha {
            info!("HA已开启，开始竞选");
            ha.campaign().await.context("主备竞选失败")?;
            Arc::clone(ha).spawn_keepalive(shutdown.subscribe());
        }

        Arc::clone(&self.fleet).start(
            Arc::clone(&self.scheduler) as Arc<dyn WorkerRemovalListener>,
            shutdown.subscribe(),
        );
        Arc::clone(&self.scheduler).start(shutdown.subscribe());

        let state = GatewayState::new(Arc::clone(&self.scheduler), Arc::clone(&self.fleet));
        let router = create_router(state);
        let addr = format!("{}:{}", self.config.master.host, self.config.master.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("监听{addr}失败"))?;
        info!("master对外服务: http://{}", addr);

        let mut stop = shutdown.subscribe();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                info!("网关开始优雅停机");
            })
            .await
            .context("HTTP服务异常退出")?;

        self.scheduler.stop().await;
        self.fleet.stop().await;
        Ok(())
    }
}
