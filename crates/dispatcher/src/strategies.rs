//! 任务分配规则
//!
//! 规则只负责在候选Worker中选出一个，不修改任何状态。

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use taskmaster_core::models::{Task, Worker};
use taskmaster_core::{SchedulerError, SchedulerResult};

/// 分配规则: 从活跃Worker中为任务选择执行节点
#[async_trait]
pub trait ScheduleRule: Send + Sync {
    fn name(&self) -> &str;

    /// 候选列表为空时返回None，任务留在队列中等待下一轮
    async fn choose_worker(&self, workers: &[Worker], task: &Task) -> Option<String>;
}

/// 随机分配
pub struct RandomRule;

#[async_trait]
impl ScheduleRule for RandomRule {
    fn name(&self) -> &str {
        "random"
    }

    async fn choose_worker(&self, workers: &[Worker], _task: &Task) -> Option<String> {
        if workers.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..workers.len());
        Some(workers[idx].id.clone())
    }
}

/// 最小负载优先，按心跳上报的running_tasks排序
pub struct LeastLoadedRule;

#[async_trait]
impl ScheduleRule for LeastLoadedRule {
    fn name(&self) -> &str {
        "least_loaded"
    }

    async fn choose_worker(&self, workers: &[Worker], _task: &Task) -> Option<String> {
        workers
            .iter()
            .min_by_key(|w| w.running_tasks)
            .map(|w| w.id.clone())
    }
}

/// 按配置名创建分配规则
pub fn create_rule(name: &str) -> SchedulerResult<Arc<dyn ScheduleRule>> {
    match name {
        "random" => Ok(Arc::new(RandomRule)),
        "least_loaded" => Ok(Arc::new(LeastLoadedRule)),
        other => Err(SchedulerError::config_error(format!(
            "不支持的分配规则: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmaster_testing_utils::builders::{TaskBuilder, WorkerBuilder};

    #[tokio::test]
    async fn test_random_rule_picks_from_candidates() {
        let rule = RandomRule;
        let workers = vec![
            WorkerBuilder::new().with_id("w1").build(),
            WorkerBuilder::new().with_id("w2").build(),
        ];
        let task = TaskBuilder::new().build();

        let chosen = rule.choose_worker(&workers, &task).await.unwrap();
        assert!(chosen == "w1" || chosen == "w2");
        assert!(rule.choose_worker(&[], &task).await.is_none());
    }

    #[tokio::test]
    async fn test_least_loaded_prefers_idle_worker() {
        let rule = LeastLoadedRule;
        let workers = vec![
            WorkerBuilder::new().with_id("w1").with_running_tasks(3).build(),
            WorkerBuilder::new().with_id("w2").with_running_tasks(1).build(),
            WorkerBuilder::new().with_id("w3").with_running_tasks(2).build(),
        ];
        let task = TaskBuilder::new().build();

        assert_eq!(
            rule.choose_worker(&workers, &task).await,
            Some("w2".to_string())
        );
    }

    #[test]
    fn test_create_rule_by_name() {
        assert_eq!(create_rule("random").unwrap().name(), "random");
        assert_eq!(create_rule("least_loaded").unwrap().name(), "least_loaded");
        assert!(create_rule("priority").is_err());
    }
}
