//! 分布式任务调度系统 master进程入口

mod app;
mod shutdown;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use taskmaster_core::config::AppConfig;

use crate::app::Application;
use crate::shutdown::ShutdownManager;

#[derive(Parser, Debug)]
#[command(name = "taskmaster", about = "分布式任务调度系统 master")]
struct Cli {
    /// 配置文件路径（TOML），环境变量TASKMASTER_*可覆盖
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别: trace|debug|info|warn|error
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 日志格式: pretty|json
    #[arg(long, default_value = "pretty")]
    log_format: String,
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    if cli.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = AppConfig::load(cli.config.as_deref())?;
    info!(
        "配置加载完成: port={} rule={} ha={}",
        config.master.port, config.master.rule, config.ha.enabled
    );

    let shutdown = ShutdownManager::new();
    tokio::spawn(shutdown.clone().listen_for_signals());

    let application = Application::build(config).await?;
    application.run(shutdown).await?;
    info!("master进程退出");
    Ok(())
}
