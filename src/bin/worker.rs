//! Worker daemon: logs in, heartbeats, pulls tasks and runs them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use taskmaster_core::config::AppConfig;
use taskmaster_core::models::WorkerCommand;
use taskmaster_core::traits::ArtifactStore;
use taskmaster_core::SchedulerError;
use taskmaster_infrastructure::LocalArtifactStore;
use taskmaster_worker::{HeartbeatReporter, MasterClient, ResultSink, TaskExecutor};

#[derive(Parser, Debug)]
#[command(name = "taskmaster-worker", about = "taskmaster worker daemon")]
struct Cli {
    /// TOML config path, TASKMASTER_* env vars override
    #[arg(short, long)]
    config: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, default_value = "pretty")]
    log_format: String,
}

/// Authentication failures are fatal, transient network errors retried.
async fn login_with_retry(client: &MasterClient, config: &AppConfig) -> anyhow::Result<String> {
    loop {
        match client
            .login(
                &config.worker.name,
                &config.worker.password,
                &config.worker.worker_id,
            )
            .await
        {
            Ok(worker_id) => return Ok(worker_id),
            Err(SchedulerError::Authentication(msg)) => {
                anyhow::bail!("login rejected: {msg}");
            }
            Err(e) => {
                warn!("login failed, retrying in 5s: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    if cli.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = AppConfig::load(cli.config.as_deref()).context("loading config")?;
    let client = Arc::new(MasterClient::new(config.worker.master_url.clone()));
    let artifacts: Arc<dyn ArtifactStore> =
        Arc::new(LocalArtifactStore::new(config.artifact.root_dir.clone()));

    let worker_id = login_with_retry(&client, &config).await?;
    info!("joined fleet as worker {}", worker_id);

    let executor = TaskExecutor::new(
        config.worker.clone(),
        artifacts,
        Arc::clone(&client) as Arc<dyn ResultSink>,
    );

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let heartbeat = HeartbeatReporter::new(
        Arc::clone(&client),
        Arc::clone(&executor),
        config.worker.clone(),
        worker_id.clone(),
    )
    .start(shutdown_tx.subscribe());

    let mut poll = tokio::time::interval(Duration::from_secs(config.worker.poll_interval_seconds));
    let mut signal = Box::pin(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            _ = poll.tick() => {
                match client.pull(&worker_id).await {
                    Ok(resp) => {
                        let cmd = resp.cmd;
                        executor.handle(&worker_id, resp).await;
                        if cmd == Some(WorkerCommand::Shutdown) {
                            info!("master requested shutdown");
                            break;
                        }
                    }
                    Err(e) => error!("pull failed: {}", e),
                }
            }
            _ = &mut signal => {
                info!("interrupted, shutting down");
                break;
            }
        }
    }

    // Kill children first so their timeout callbacks go out before logout.
    executor.clean_tasks().await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    let _ = shutdown_tx.send(());
    let _ = heartbeat.await;
    if let Err(e) = client.logout(&worker_id).await {
        warn!("logout failed: {}", e);
    }
    info!("worker stopped");
    Ok(())
}
