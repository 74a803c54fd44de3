//! 停机协调: 信号一次广播，各后台循环各自收尾

use tokio::sync::broadcast;
use tracing::info;

#[derive(Clone)]
pub struct ShutdownManager {
    tx: broadcast::Sender<()>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }

    /// 等待SIGINT/SIGTERM后触发广播
    pub async fn listen_for_signals(self) {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("收到SIGINT"),
            _ = terminate => info!("收到SIGTERM"),
        }
        self.shutdown();
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
