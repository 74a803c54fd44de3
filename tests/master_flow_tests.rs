//! master侧端到端流程: 提交、分配、拉取、回调与故障收敛

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use taskmaster_core::config::MasterConfig;
use taskmaster_core::models::{
    HeartbeatRequest, JobGroup, LoginRequest, TaskCallbackRequest, TaskState, WorkerCredential,
};
use taskmaster_dispatcher::{
    create_rule, Scheduler, WorkerFleetManager, WorkerRemovalListener,
};
use taskmaster_infrastructure::MemoryJobStore;

struct Cluster {
    scheduler: Arc<Scheduler>,
    fleet: Arc<WorkerFleetManager>,
}

fn cluster(task_timeout_seconds: u64, worker_timeout_seconds: u64) -> Cluster {
    let config = MasterConfig {
        task_timeout_seconds,
        worker_timeout_seconds,
        rule: "least_loaded".to_string(),
        ..Default::default()
    };
    let fleet = Arc::new(WorkerFleetManager::new(
        vec![WorkerCredential {
            name: "node".to_string(),
            password: "pw".to_string(),
        }],
        worker_timeout_seconds,
    ));
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(MemoryJobStore::new()),
        Arc::clone(&fleet),
        create_rule(&config.rule).unwrap(),
        config,
    ));
    Cluster { scheduler, fleet }
}

async fn join_worker(cluster: &Cluster) -> String {
    cluster
        .fleet
        .login(&LoginRequest {
            name: "node".to_string(),
            password: "pw".to_string(),
            worker_id: String::new(),
        })
        .await
        .unwrap()
}

async fn heartbeat(cluster: &Cluster, worker_id: &str) {
    cluster
        .fleet
        .heartbeat(&HeartbeatRequest {
            worker_id: worker_id.to_string(),
            resources: Default::default(),
            running_tasks: 0,
        })
        .await;
}

fn success_callback(task_id: &str, worker_id: &str) -> TaskCallbackRequest {
    TaskCallbackRequest {
        task_id: task_id.to_string(),
        worker_id: worker_id.to_string(),
        state: TaskState::Success,
        done_time: Utc::now(),
    }
}

#[tokio::test]
async fn test_job_group_converges_to_success() {
    let cluster = cluster(30, 20);
    let worker_id = join_worker(&cluster).await;

    cluster
        .scheduler
        .add_job_group(&JobGroup::new("g1", "nightly", "run.sh", 3))
        .await
        .unwrap();
    assert_eq!(cluster.scheduler.schedule_once().await.unwrap(), 3);

    let (tasks, cancels) = cluster.scheduler.pull_tasks(&worker_id).await.unwrap();
    assert_eq!(tasks.len(), 3);
    assert!(cancels.is_empty());
    assert_eq!(tasks[0].script, "run.sh");

    for task in &tasks {
        cluster
            .scheduler
            .task_callback(&success_callback(&task.task_id, &worker_id))
            .await
            .unwrap();
    }

    let views = cluster.scheduler.task_group_views().await.unwrap();
    assert_eq!(views[0].finished, 3);
    assert!(cluster.scheduler.alive_job_groups().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dropped_callback_converges_via_sweep() {
    // 执行时长上限1秒，回调丢失的任务应在一个清扫周期内重新入队
    let cluster = cluster(1, 60);
    let worker_id = join_worker(&cluster).await;

    cluster
        .scheduler
        .add_job_group(&JobGroup::new("g1", "nightly", "run.sh", 1))
        .await
        .unwrap();
    cluster.scheduler.schedule_once().await.unwrap();
    let (tasks, _) = cluster.scheduler.pull_tasks(&worker_id).await.unwrap();
    let task_id = tasks[0].task_id.clone();

    // Worker崩溃前没有发出回调，心跳也停了但尚未超时
    heartbeat(&cluster, &worker_id).await;
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(cluster.scheduler.sweep_once().await.unwrap(), 1);

    // 取消命令随下一次pull下发，任务可重新分配执行
    let (_, cancels) = cluster.scheduler.pull_tasks(&worker_id).await.unwrap();
    assert!(cancels.contains(&task_id));

    cluster.scheduler.schedule_once().await.unwrap();
    let (tasks, _) = cluster.scheduler.pull_tasks(&worker_id).await.unwrap();
    assert_eq!(tasks[0].task_id, task_id);
    cluster
        .scheduler
        .task_callback(&success_callback(&task_id, &worker_id))
        .await
        .unwrap();
    let task = cluster.scheduler.get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Success);
}

#[tokio::test]
async fn test_dead_worker_tasks_reassigned() {
    let cluster = cluster(3600, 1);
    let dead = join_worker(&cluster).await;

    cluster
        .scheduler
        .add_job_group(&JobGroup::new("g1", "nightly", "run.sh", 2))
        .await
        .unwrap();
    cluster.scheduler.schedule_once().await.unwrap();
    let (tasks, _) = cluster.scheduler.pull_tasks(&dead).await.unwrap();
    assert_eq!(tasks.len(), 2);

    // 心跳停1秒即超时，清扫移除该Worker并回收任务
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let listener: Arc<dyn WorkerRemovalListener> = Arc::clone(&cluster.scheduler) as _;
    assert_eq!(cluster.fleet.sweep_once(&listener).await, 1);

    for task in &tasks {
        let stored = cluster
            .scheduler
            .get_task(&task.task_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, TaskState::Pending);
        assert!(stored.worker_id.is_none());
    }

    // 新Worker接管
    let fresh = join_worker(&cluster).await;
    assert_eq!(cluster.scheduler.schedule_once().await.unwrap(), 2);
    let (tasks, _) = cluster.scheduler.pull_tasks(&fresh).await.unwrap();
    assert_eq!(tasks.len(), 2);
}

#[tokio::test]
async fn test_late_callback_after_requeue_is_rejected() {
    let cluster = cluster(1, 60);
    let worker_id = join_worker(&cluster).await;

    cluster
        .scheduler
        .add_job_group(&JobGroup::new("g1", "nightly", "run.sh", 1))
        .await
        .unwrap();
    cluster.scheduler.schedule_once().await.unwrap();
    let (tasks, _) = cluster.scheduler.pull_tasks(&worker_id).await.unwrap();
    let task_id = tasks[0].task_id.clone();

    heartbeat(&cluster, &worker_id).await;
    tokio::time::sleep(Duration::from_millis(1200)).await;
    cluster.scheduler.sweep_once().await.unwrap();

    // 任务已重新入队为PENDING，迟到的SUCCESS回调不再合法
    let late = cluster
        .scheduler
        .task_callback(&success_callback(&task_id, &worker_id))
        .await;
    assert!(late.is_err());
}
