use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use taskmaster_core::models::{JobGroup, Task, TaskState};
use taskmaster_core::traits::JobStore;
use taskmaster_core::{SchedulerError, SchedulerResult};

/// 内存任务存储实现
///
/// 适用于嵌入式部署和测试场景，无需外部数据库。
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    groups: Arc<RwLock<HashMap<String, JobGroup>>>,
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get_job_group(&self, id: &str) -> SchedulerResult<Option<JobGroup>> {
        Ok(self.groups.read().await.get(id).cloned())
    }

    async fn list_job_groups(&self) -> SchedulerResult<Vec<JobGroup>> {
        Ok(self.groups.read().await.values().cloned().collect())
    }

    async fn insert_job_group(&self, group: &JobGroup) -> SchedulerResult<()> {
        self.groups
            .write()
            .await
            .insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn delete_job_group(&self, id: &str) -> SchedulerResult<()> {
        self.groups.write().await.remove(id);
        Ok(())
    }

    async fn insert_task(&self, task: &Task) -> SchedulerResult<()> {
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn update_task(
        &self,
        id: &str,
        state: TaskState,
        worker_id: Option<&str>,
        done_time: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        task.state = state;
        task.worker_id = worker_id.map(|w| w.to_string());
        if done_time.is_some() {
            task.done_time = done_time;
        }
        Ok(())
    }

    async fn get_task(&self, id: &str) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn list_tasks_for_group(&self, job_id: &str) -> SchedulerResult<Vec<Task>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn delete_tasks_for_group(&self, job_id: &str) -> SchedulerResult<()> {
        self.tasks.write().await.retain(|_, t| t.job_id != job_id);
        Ok(())
    }
}
