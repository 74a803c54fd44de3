use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::SchedulerResult;
use crate::models::{JobGroup, Task, TaskState};

/// 任务持久化存储端口
///
/// 调度器独占持有内存缓存，所有状态变更经由本端口落库。
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job_group(&self, id: &str) -> SchedulerResult<Option<JobGroup>>;

    async fn list_job_groups(&self) -> SchedulerResult<Vec<JobGroup>>;

    async fn insert_job_group(&self, group: &JobGroup) -> SchedulerResult<()>;

    async fn delete_job_group(&self, id: &str) -> SchedulerResult<()>;

    async fn insert_task(&self, task: &Task) -> SchedulerResult<()>;

    async fn update_task(
        &self,
        id: &str,
        state: TaskState,
        worker_id: Option<&str>,
        done_time: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()>;

    async fn get_task(&self, id: &str) -> SchedulerResult<Option<Task>>;

    async fn list_tasks_for_group(&self, job_id: &str) -> SchedulerResult<Vec<Task>>;

    async fn delete_tasks_for_group(&self, job_id: &str) -> SchedulerResult<()>;
}
