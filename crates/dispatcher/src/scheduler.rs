//! 任务调度器
//!
//! 任务组平铺展开为任务，按分配规则派发到活跃Worker。投递走pull通道：
//! 分配只写worker_id，Worker拉取时才转RUNNING。超时清扫把滞留的RUNNING
//! 任务标记超时、下发取消命令并重新入队，保证至少一次执行。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use taskmaster_core::models::{
    JobGroup, Task, TaskAssignment, TaskCallbackRequest, TaskGroupView, TaskState,
};
use taskmaster_core::traits::JobStore;
use taskmaster_core::{config::MasterConfig, SchedulerError, SchedulerResult};

use crate::fleet::{WorkerFleetManager, WorkerRemovalListener};
use crate::strategies::ScheduleRule;

pub struct Scheduler {
    store: Arc<dyn JobStore>,
    fleet: Arc<WorkerFleetManager>,
    rule: Arc<dyn ScheduleRule>,
    config: MasterConfig,
    /// 任务进入RUNNING的时间，超时清扫据此判定滞留
    running_since: RwLock<HashMap<String, DateTime<Utc>>>,
    /// worker_id -> 待下发的取消task id，pull时一次性投递
    pending_cancels: RwLock<HashMap<String, Vec<String>>>,
    running: RwLock<bool>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        fleet: Arc<WorkerFleetManager>,
        rule: Arc<dyn ScheduleRule>,
        config: MasterConfig,
    ) -> Self {
        Self {
            store,
            fleet,
            rule,
            config,
            running_since: RwLock::new(HashMap::new()),
            pending_cancels: RwLock::new(HashMap::new()),
            running: RwLock::new(false),
        }
    }

    /// 提交任务组并展开fanout个任务
    ///
    /// 重复提交是幂等的: 任务组元数据按upsert覆盖，已展开过的任务不再
    /// 重复创建。
    pub async fn add_job_group(&self, group: &JobGroup) -> SchedulerResult<()> {
        self.store.insert_job_group(group).await?;
        let existing = self.store.list_tasks_for_group(&group.id).await?;
        if !existing.is_empty() {
            debug!("任务组{}已展开过，跳过任务创建", group.id);
            return Ok(());
        }
        for _ in 0..group.fanout.max(1) {
            self.store.insert_task(&Task::new(&group.id)).await?;
        }
        info!("任务组提交: id={} fanout={}", group.id, group.fanout.max(1));
        Ok(())
    }

    /// 删除任务组，运行中的任务会向其Worker下发取消命令
    ///
    /// 删除不存在的任务组是无操作，保持幂等。
    pub async fn delete_job_group(&self, job_id: &str) -> SchedulerResult<()> {
        if self.store.get_job_group(job_id).await?.is_none() {
            debug!("删除不存在的任务组，忽略: id={}", job_id);
            return Ok(());
        }
        let tasks = self.store.list_tasks_for_group(job_id).await?;
        {
            let mut cancels = self.pending_cancels.write().await;
            let mut running_since = self.running_since.write().await;
            for task in &tasks {
                running_since.remove(&task.id);
                if task.state == TaskState::Running {
                    if let Some(worker_id) = &task.worker_id {
                        cancels
                            .entry(worker_id.clone())
                            .or_default()
                            .push(task.id.clone());
                    }
                }
            }
        }
        self.store.delete_tasks_for_group(job_id).await?;
        self.store.delete_job_group(job_id).await?;
        info!("任务组删除: id={} 任务数={}", job_id, tasks.len());
        Ok(())
    }

    /// 重建任务组: 先删后建，任务全部回到PENDING重新展开
    pub async fn apply_job_group(&self, group: &JobGroup) -> SchedulerResult<()> {
        self.delete_job_group(&group.id).await?;
        self.add_job_group(group).await
    }

    async fn all_tasks(&self) -> SchedulerResult<Vec<Task>> {
        let mut tasks = Vec::new();
        for group in self.store.list_job_groups().await? {
            tasks.extend(self.store.list_tasks_for_group(&group.id).await?);
        }
        Ok(tasks)
    }

    /// 分配一轮: 为未分配的PENDING任务挑选Worker，返回分配数量
    ///
    /// 只写worker_id不改状态，任务要等Worker拉取时才转RUNNING。
    pub async fn schedule_once(&self) -> SchedulerResult<usize> {
        let workers = self.fleet.alive_workers().await;
        if workers.is_empty() {
            debug!("无活跃Worker，本轮不分配");
            return Ok(0);
        }
        let mut assigned = 0;
        for task in self.all_tasks().await? {
            if task.state != TaskState::Pending || task.is_assigned() {
                continue;
            }
            match self.rule.choose_worker(&workers, &task).await {
                Some(worker_id) => {
                    self.store
                        .update_task(&task.id, TaskState::Pending, Some(&worker_id), None)
                        .await?;
                    debug!("任务分配: task={} worker={}", task.id, worker_id);
                    assigned += 1;
                }
                None => break,
            }
        }
        if assigned > 0 {
            info!("分配{}个任务（规则: {}）", assigned, self.rule.name());
        }
        Ok(assigned)
    }

    /// 超时清扫一轮: 回收滞留的RUNNING任务与Worker已离场的已分配任务
    ///
    /// RUNNING的判定条件二选一: 执行时长超过任务组的running_timeout
    /// （未指定时用task_timeout），或执行它的Worker已不在活跃列表。
    /// 主备切换后running_since为空，首轮只补登时间戳，滞留任务会在
    /// 下一轮被回收。已分配未拉取的PENDING任务在Worker登出或失联后
    /// 同样在此解除绑定，等待重新分配。
    pub async fn sweep_once(&self) -> SchedulerResult<usize> {
        let now = Utc::now();
        let alive: Vec<String> = self
            .fleet
            .alive_workers()
            .await
            .into_iter()
            .map(|w| w.id)
            .collect();

        let mut recovered = 0;
        for group in self.store.list_job_groups().await? {
            let timeout = chrono::Duration::seconds(
                group
                    .running_timeout_seconds
                    .unwrap_or(self.config.task_timeout_seconds as i64),
            );
            for task in self.store.list_tasks_for_group(&group.id).await? {
                let worker_gone = task
                    .worker_id
                    .as_ref()
                    .map(|w| !alive.contains(w))
                    .unwrap_or(true);
                match task.state {
                    TaskState::Running => {
                        let since = {
                            let mut running_since = self.running_since.write().await;
                            *running_since.entry(task.id.clone()).or_insert(now)
                        };
                        if now - since < timeout && !worker_gone {
                            continue;
                        }
                        warn!(
                            "任务滞留RUNNING，重新入队: task={} worker={:?} worker_gone={}",
                            task.id, task.worker_id, worker_gone
                        );
                        self.store
                            .update_task(
                                &task.id,
                                TaskState::RunningTimeout,
                                task.worker_id.as_deref(),
                                None,
                            )
                            .await?;
                        if let Some(worker_id) = &task.worker_id {
                            self.pending_cancels
                                .write()
                                .await
                                .entry(worker_id.clone())
                                .or_default()
                                .push(task.id.clone());
                        }
                        self.store
                            .update_task(&task.id, TaskState::Pending, None, None)
                            .await?;
                        self.running_since.write().await.remove(&task.id);
                        recovered += 1;
                    }
                    TaskState::Pending if task.is_assigned() && worker_gone => {
                        warn!(
                            "已分配任务的Worker离场，解除绑定: task={} worker={:?}",
                            task.id, task.worker_id
                        );
                        self.store
                            .update_task(&task.id, TaskState::Pending, None, None)
                            .await?;
                        recovered += 1;
                    }
                    _ => {}
                }
            }
        }
        Ok(recovered)
    }

    /// Worker拉取: 已分配给它的PENDING任务转RUNNING后下发，同时带走
    /// 积压的取消命令（一次性，取走即清空）
    pub async fn pull_tasks(
        &self,
        worker_id: &str,
    ) -> SchedulerResult<(Vec<TaskAssignment>, Vec<String>)> {
        let mut assignments = Vec::new();
        let now = Utc::now();
        for group in self.store.list_job_groups().await? {
            for task in self.store.list_tasks_for_group(&group.id).await? {
                if task.state != TaskState::Pending || task.worker_id.as_deref() != Some(worker_id)
                {
                    continue;
                }
                self.store
                    .update_task(&task.id, TaskState::Running, Some(worker_id), None)
                    .await?;
                self.running_since.write().await.insert(task.id.clone(), now);
                assignments.push(TaskAssignment {
                    task_id: task.id,
                    job_id: task.job_id,
                    script: group.script.clone(),
                    state: TaskState::Running,
                });
            }
        }
        let cancels = self
            .pending_cancels
            .write()
            .await
            .remove(worker_id)
            .unwrap_or_default();
        if !assignments.is_empty() || !cancels.is_empty() {
            debug!(
                "pull: worker={} tasks={} cancels={}",
                worker_id,
                assignments.len(),
                cancels.len()
            );
        }
        Ok((assignments, cancels))
    }

    /// Worker执行结果回调
    ///
    /// 至少一次语义下回调可能重复到达: 与当前终态相同的重复回调幂等
    /// 成功，与终态冲突的回调被拒绝，终态不被覆盖。
    pub async fn task_callback(&self, req: &TaskCallbackRequest) -> SchedulerResult<()> {
        let task = self
            .store
            .get_task(&req.task_id)
            .await?
            .ok_or_else(|| SchedulerError::task_not_found(&req.task_id))?;

        if task.state.is_terminal() {
            if task.state == req.state {
                debug!("重复回调，幂等忽略: task={} state={}", req.task_id, req.state);
                return Ok(());
            }
            return Err(SchedulerError::TerminalStateConflict {
                task_id: req.task_id.clone(),
                current: task.state.to_string(),
                requested: req.state.to_string(),
            });
        }
        if !task.state.can_transition_to(req.state) {
            return Err(SchedulerError::InvalidStateTransition {
                from: task.state.to_string(),
                to: req.state.to_string(),
            });
        }

        self.store
            .update_task(
                &req.task_id,
                req.state,
                Some(&req.worker_id),
                Some(req.done_time),
            )
            .await?;
        self.running_since.write().await.remove(&req.task_id);
        info!(
            "任务回调: task={} worker={} state={}",
            req.task_id, req.worker_id, req.state
        );
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        self.store.get_task(task_id).await
    }

    pub async fn get_job_group(&self, job_id: &str) -> SchedulerResult<Option<JobGroup>> {
        self.store.get_job_group(job_id).await
    }

    pub async fn list_job_groups(&self) -> SchedulerResult<Vec<JobGroup>> {
        self.store.list_job_groups().await
    }

    /// 等待分配或投递的任务
    pub async fn pending_tasks(&self) -> SchedulerResult<Vec<Task>> {
        Ok(self
            .all_tasks()
            .await?
            .into_iter()
            .filter(|t| t.state == TaskState::Pending)
            .collect())
    }

    /// 未完成（非终态）的任务
    pub async fn alive_tasks(&self) -> SchedulerResult<Vec<Task>> {
        Ok(self
            .all_tasks()
            .await?
            .into_iter()
            .filter(|t| !t.is_terminal())
            .collect())
    }

    /// 仍有未完成任务的任务组
    pub async fn alive_job_groups(&self) -> SchedulerResult<Vec<JobGroup>> {
        let mut alive = Vec::new();
        for group in self.store.list_job_groups().await? {
            let tasks = self.store.list_tasks_for_group(&group.id).await?;
            if tasks.iter().any(|t| !t.is_terminal()) {
                alive.push(group);
            }
        }
        Ok(alive)
    }

    /// 各任务组的运行期统计视图
    pub async fn task_group_views(&self) -> SchedulerResult<Vec<TaskGroupView>> {
        let mut views = Vec::new();
        for group in self.store.list_job_groups().await? {
            let tasks = self.store.list_tasks_for_group(&group.id).await?;
            views.push(TaskGroupView {
                job_id: group.id,
                total: tasks.len(),
                pending: tasks
                    .iter()
                    .filter(|t| t.state == TaskState::Pending)
                    .count(),
                running: tasks
                    .iter()
                    .filter(|t| t.state == TaskState::Running)
                    .count(),
                finished: tasks.iter().filter(|t| t.is_terminal()).count(),
            });
        }
        Ok(views)
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// 启动分配循环与超时清扫循环
    pub fn start(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> Vec<JoinHandle<()>> {
        let assign = {
            let scheduler = Arc::clone(&self);
            let mut shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                *scheduler.running.write().await = true;
                let mut ticker = tokio::time::interval(Duration::from_secs(
                    scheduler.config.schedule_loop_seconds,
                ));
                info!(
                    "分配循环启动，周期{}秒",
                    scheduler.config.schedule_loop_seconds
                );
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if !*scheduler.running.read().await {
                                break;
                            }
                            if let Err(e) = scheduler.schedule_once().await {
                                error!("分配循环出错: {}", e);
                            }
                        }
                        _ = shutdown.recv() => {
                            info!("分配循环收到停机信号");
                            break;
                        }
                    }
                }
            })
        };
        let sweep = {
            let scheduler = Arc::clone(&self);
            let mut shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(
                    scheduler.config.schedule_timeout_seconds,
                ));
                info!(
                    "超时清扫循环启动，周期{}秒",
                    scheduler.config.schedule_timeout_seconds
                );
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if !*scheduler.running.read().await {
                                break;
                            }
                            match scheduler.sweep_once().await {
                                Ok(0) => {}
                                Ok(n) => info!("清扫回收{}个滞留任务", n),
                                Err(e) => error!("超时清扫出错: {}", e),
                            }
                        }
                        _ = shutdown.recv() => {
                            info!("超时清扫循环收到停机信号");
                            break;
                        }
                    }
                }
            })
        };
        vec![assign, sweep]
    }
}

#[async_trait]
impl WorkerRemovalListener for Scheduler {
    /// Worker被判死后回收其任务: RUNNING的经RUNNING_TIMEOUT重新入队，
    /// 已分配未拉取的解除绑定
    async fn on_worker_removed(&self, worker_id: &str) {
        let tasks = match self.all_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("回收Worker任务时读取存储失败: worker={} {}", worker_id, e);
                return;
            }
        };
        for task in tasks {
            if task.worker_id.as_deref() != Some(worker_id) || task.is_terminal() {
                continue;
            }
            let result = match task.state {
                TaskState::Running => {
                    self.running_since.write().await.remove(&task.id);
                    match self
                        .store
                        .update_task(&task.id, TaskState::RunningTimeout, Some(worker_id), None)
                        .await
                    {
                        Ok(()) => {
                            self.store
                                .update_task(&task.id, TaskState::Pending, None, None)
                                .await
                        }
                        Err(e) => Err(e),
                    }
                }
                _ => {
                    self.store
                        .update_task(&task.id, task.state, None, None)
                        .await
                }
            };
            match result {
                Ok(()) => info!("回收任务: task={} 原worker={}", task.id, worker_id),
                Err(e) => error!("回收任务失败: task={} {}", task.id, e),
            }
        }
    }
}
