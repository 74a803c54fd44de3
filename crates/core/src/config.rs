use serde::{Deserialize, Serialize};

use crate::errors::{SchedulerError, SchedulerResult};
use crate::models::WorkerCredential;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    pub host: String,
    pub port: u16,
    /// 调度分配循环周期（秒）
    pub schedule_loop_seconds: u64,
    /// RUNNING任务超时清扫周期（秒）
    pub schedule_timeout_seconds: u64,
    /// 任务执行时长上限（秒），任务组未指定running_timeout时生效
    #[serde(default = "default_task_timeout")]
    pub task_timeout_seconds: u64,
    /// Worker心跳超时（秒）
    pub worker_timeout_seconds: u64,
    /// 分配规则: random | least_loaded
    pub rule: String,
}

fn default_task_timeout() -> u64 {
    3600
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8230,
            schedule_loop_seconds: 10,
            schedule_timeout_seconds: 30,
            task_timeout_seconds: 3600,
            worker_timeout_seconds: 20,
            rule: "random".to_string(),
        }
    }
}

impl MasterConfig {
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.schedule_loop_seconds == 0 || self.schedule_timeout_seconds == 0 {
            return Err(SchedulerError::config_error("调度周期必须大于0"));
        }
        if self.task_timeout_seconds == 0 {
            return Err(SchedulerError::config_error("task_timeout必须大于0"));
        }
        if self.worker_timeout_seconds == 0 {
            return Err(SchedulerError::config_error("worker_timeout必须大于0"));
        }
        let valid_rules = ["random", "least_loaded"];
        if !valid_rules.contains(&self.rule.as_str()) {
            return Err(SchedulerError::config_error(format!(
                "不支持的分配规则: {}，可选: {:?}",
                self.rule, valid_rules
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaConfig {
    pub enabled: bool,
    /// 协调存储中的namespace键，键的归属即主权
    pub namespace: String,
    pub endpoints: Vec<String>,
    pub lease_ttl_seconds: i64,
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: "/taskmaster/master".to_string(),
            endpoints: vec!["memory://local".to_string()],
            lease_ttl_seconds: 9,
        }
    }
}

impl HaConfig {
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.enabled && self.endpoints.is_empty() {
            return Err(SchedulerError::config_error("HA启用时endpoints不能为空"));
        }
        if self.lease_ttl_seconds < 3 {
            return Err(SchedulerError::config_error("lease_ttl不能小于3秒"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerProcessConfig {
    pub worker_id: String,
    pub name: String,
    pub password: String,
    pub master_url: String,
    /// 单Worker并发执行上限
    pub max_tasks: usize,
    pub poll_interval_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    /// 子进程退出轮询间隔（毫秒）
    pub process_poll_interval_ms: u64,
    pub script_dir: String,
    pub log_dir: String,
}

impl Default for WorkerProcessConfig {
    fn default() -> Self {
        Self {
            worker_id: String::new(),
            name: "worker".to_string(),
            password: "worker".to_string(),
            master_url: "http://127.0.0.1:8230".to_string(),
            max_tasks: 4,
            poll_interval_seconds: 5,
            heartbeat_interval_seconds: 5,
            process_poll_interval_ms: 500,
            script_dir: "/var/lib/taskmaster/scripts".to_string(),
            log_dir: "/var/lib/taskmaster/logs".to_string(),
        }
    }
}

impl WorkerProcessConfig {
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.name.is_empty() {
            return Err(SchedulerError::config_error("worker.name不能为空"));
        }
        if self.max_tasks == 0 || self.max_tasks > 1000 {
            return Err(SchedulerError::config_error(
                "worker.max_tasks必须在1..=1000范围内",
            ));
        }
        if self.poll_interval_seconds == 0 || self.heartbeat_interval_seconds == 0 {
            return Err(SchedulerError::config_error("worker轮询间隔必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// 共享制品存储根目录
    pub root_dir: String,
    pub script_dir: String,
    pub log_dir: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            root_dir: "/var/lib/taskmaster/artifacts".to_string(),
            script_dir: "scripts".to_string(),
            log_dir: "logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ha: HaConfig,
    #[serde(default)]
    pub worker: WorkerProcessConfig,
    #[serde(default)]
    pub artifact: ArtifactConfig,
    /// 允许登录的Worker凭据表
    #[serde(default)]
    pub credentials: Vec<WorkerCredential>,
}

impl AppConfig {
    /// 加载配置: TOML文件 + TASKMASTER_前缀环境变量覆盖
    pub fn load(path: Option<&str>) -> SchedulerResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("TASKMASTER")
                .separator("__")
                .try_parsing(true),
        );
        let settings = builder
            .build()
            .map_err(|e| SchedulerError::config_error(format!("构建配置失败: {e}")))?;
        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| SchedulerError::config_error(format!("解析配置失败: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        self.master.validate()?;
        self.ha.validate()?;
        self.worker.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let mut config = MasterConfig::default();
        config.rule = "priority".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let mut config = MasterConfig::default();
        config.schedule_loop_seconds = 0;
        assert!(config.validate().is_err());

        let mut worker = WorkerProcessConfig::default();
        worker.poll_interval_seconds = 0;
        assert!(worker.validate().is_err());
    }

    #[test]
    fn test_ha_requires_endpoints() {
        let mut ha = HaConfig::default();
        ha.enabled = true;
        ha.endpoints.clear();
        assert!(ha.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskmaster.toml");
        std::fs::write(
            &path,
            r#"
[master]
host = "0.0.0.0"
port = 9000
schedule_loop_seconds = 5
schedule_timeout_seconds = 15
worker_timeout_seconds = 10
rule = "least_loaded"

[[credentials]]
name = "w"
password = "secret"
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.master.port, 9000);
        assert_eq!(config.master.rule, "least_loaded");
        // 未写的字段落到缺省值
        assert_eq!(config.master.task_timeout_seconds, 3600);
        assert_eq!(config.credentials.len(), 1);
        assert_eq!(config.credentials[0].name, "w");
    }
}
