//! Task execution engine.
//!
//! Scripts are fetched from the shared artifact store, cached per job
//! group, and run as child processes with stdout/stderr captured to a
//! per-task log file. Results are reported through a `ResultSink`; a
//! failed report is swallowed because the master's timeout sweep will
//! recover the task (at-least-once semantics).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tokio::sync::{Notify, RwLock, Semaphore};
use tracing::{debug, info, warn};

use taskmaster_core::config::WorkerProcessConfig;
use taskmaster_core::models::{PullResponse, TaskAssignment, TaskCallbackRequest, TaskState};
use taskmaster_core::traits::ArtifactStore;
use taskmaster_core::{SchedulerError, SchedulerResult};

use crate::master_client::ResultSink;

/// Local observation hook, fired when a task reaches its terminal state
/// just before the result callback goes out.
pub trait TaskListener: Send + Sync {
    fn on_task_done(&self, task_id: &str, state: TaskState);
}

pub struct TaskExecutor {
    config: WorkerProcessConfig,
    artifacts: Arc<dyn ArtifactStore>,
    sink: Arc<dyn ResultSink>,
    listener: Option<Arc<dyn TaskListener>>,
    slots: Arc<Semaphore>,
    /// task_id -> kill signal for the running child process
    kill_signals: Arc<RwLock<HashMap<String, Arc<Notify>>>>,
    running: Arc<AtomicI32>,
}

impl TaskExecutor {
    pub fn new(
        config: WorkerProcessConfig,
        artifacts: Arc<dyn ArtifactStore>,
        sink: Arc<dyn ResultSink>,
    ) -> Arc<Self> {
        Self::with_listener(config, artifacts, sink, None)
    }

    pub fn with_listener(
        config: WorkerProcessConfig,
        artifacts: Arc<dyn ArtifactStore>,
        sink: Arc<dyn ResultSink>,
        listener: Option<Arc<dyn TaskListener>>,
    ) -> Arc<Self> {
        let slots = Arc::new(Semaphore::new(config.max_tasks));
        Arc::new(Self {
            config,
            artifacts,
            sink,
            listener,
            slots,
            kill_signals: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicI32::new(0)),
        })
    }

    pub fn running_tasks(&self) -> i32 {
        self.running.load(Ordering::SeqCst)
    }

    /// Dispatch everything a pull response carries. The shutdown command
    /// is the daemon's concern, not handled here.
    pub async fn handle(self: &Arc<Self>, worker_id: &str, resp: PullResponse) {
        self.cancel(&resp.cancels).await;
        for task_id in &resp.log_requests {
            if let Err(e) = self.upload_log(task_id).await {
                warn!("log upload for {} failed: {}", task_id, e);
            }
        }
        for assignment in resp.tasks {
            self.spawn(worker_id.to_string(), assignment);
        }
    }

    pub fn spawn(self: &Arc<Self>, worker_id: String, assignment: TaskAssignment) {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            executor.run_task(worker_id, assignment).await;
        });
    }

    /// Kill the named tasks if they are still running locally.
    pub async fn cancel(&self, task_ids: &[String]) {
        let signals = self.kill_signals.read().await;
        for task_id in task_ids {
            match signals.get(task_id) {
                Some(signal) => {
                    info!("cancelling task {}", task_id);
                    signal.notify_one();
                }
                None => debug!("cancel for {} ignored, not running here", task_id),
            }
        }
    }

    /// Kill everything still running. Used on graceful shutdown.
    pub async fn clean_tasks(&self) {
        let signals = self.kill_signals.read().await;
        for (task_id, signal) in signals.iter() {
            info!("shutting down, killing task {}", task_id);
            signal.notify_one();
        }
    }

    fn local_script_path(&self, assignment: &TaskAssignment) -> PathBuf {
        PathBuf::from(&self.config.script_dir)
            .join(&assignment.job_id)
            .join(&assignment.script)
    }

    fn local_log_path(&self, task_id: &str) -> PathBuf {
        PathBuf::from(&self.config.log_dir).join(format!("{task_id}.log"))
    }

    /// Download the script unless a previous task of the same job group
    /// already cached it.
    async fn ensure_script(&self, assignment: &TaskAssignment) -> SchedulerResult<PathBuf> {
        let local = self.local_script_path(assignment);
        if tokio::fs::try_exists(&local).await.unwrap_or(false) {
            debug!("script cache hit for job {}", assignment.job_id);
        } else {
            self.artifacts
                .download(
                    &local,
                    &format!("scripts/{}", assignment.job_id),
                    &assignment.script,
                )
                .await?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&local, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| SchedulerError::TaskExecution(format!("chmod failed: {e}")))?;
        }
        Ok(local)
    }

    async fn report(&self, task_id: &str, worker_id: &str, state: TaskState) {
        let req = TaskCallbackRequest {
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
            state,
            done_time: Utc::now(),
        };
        // A lost callback is recovered by the master's timeout sweep.
        if let Err(e) = self.sink.report(&req).await {
            warn!("result callback for {} failed: {}", task_id, e);
        }
    }

    async fn run_task(self: Arc<Self>, worker_id: String, assignment: TaskAssignment) {
        let task_id = assignment.task_id.clone();
        let kill = Arc::new(Notify::new());
        // Registered before queuing for a slot so a cancel can reach a
        // task that is still waiting on the semaphore.
        self.kill_signals
            .write()
            .await
            .insert(task_id.clone(), Arc::clone(&kill));

        let permit = tokio::select! {
            permit = Arc::clone(&self.slots).acquire_owned() => permit.ok(),
            _ = kill.notified() => None,
        };
        let Some(permit) = permit else {
            info!("task {} cancelled before start", task_id);
            self.kill_signals.write().await.remove(&task_id);
            if let Some(listener) = &self.listener {
                listener.on_task_done(&task_id, TaskState::RunningTimeout);
            }
            self.report(&task_id, &worker_id, TaskState::RunningTimeout).await;
            return;
        };
        self.running.fetch_add(1, Ordering::SeqCst);

        let state = self.execute(&assignment, &kill).await;
        if let Some(listener) = &self.listener {
            listener.on_task_done(&task_id, state);
        }
        self.report(&task_id, &worker_id, state).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.kill_signals.write().await.remove(&task_id);
        drop(permit);
    }

    async fn execute(&self, assignment: &TaskAssignment, kill: &Notify) -> TaskState {
        let task_id = &assignment.task_id;
        let script = match self.ensure_script(assignment).await {
            Ok(path) => path,
            Err(e) => {
                warn!("script download for task {} failed: {}", task_id, e);
                return TaskState::DownloadFail;
            }
        };

        let log_path = self.local_log_path(task_id);
        let log_file = match self.open_log(&log_path).await {
            Ok(file) => file,
            Err(e) => {
                warn!("cannot open log file for task {}: {}", task_id, e);
                return TaskState::Fail;
            }
        };
        let stderr = match log_file.try_clone() {
            Ok(clone) => Stdio::from(clone),
            Err(_) => Stdio::null(),
        };

        let mut child = match Command::new(&script)
            .stdout(Stdio::from(log_file))
            .stderr(stderr)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!("spawn for task {} failed: {}", task_id, e);
                return TaskState::Fail;
            }
        };
        info!("task {} started, pid={:?}", task_id, child.id());

        let poll = Duration::from_millis(self.config.process_poll_interval_ms.max(10));
        let mut cancelled = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {}
                Err(e) => {
                    warn!("wait for task {} failed: {}", task_id, e);
                    break None;
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = kill.notified() => {
                    cancelled = true;
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    break None;
                }
            }
        };

        if let Err(e) = self
            .artifacts
            .upload(&log_path, "logs", &format!("{task_id}.log"))
            .await
        {
            warn!("log upload for task {} failed: {}", task_id, e);
        }

        if cancelled {
            info!("task {} killed on request", task_id);
            return TaskState::RunningTimeout;
        }
        match status {
            Some(status) if status.success() => TaskState::Success,
            Some(status) => {
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    // Killed by an external signal, treat like a timeout kill.
                    if status.signal().is_some() {
                        return TaskState::RunningTimeout;
                    }
                }
                info!("task {} exited with {:?}", task_id, status.code());
                TaskState::Fail
            }
            None => TaskState::Fail,
        }
    }

    async fn open_log(&self, path: &PathBuf) -> SchedulerResult<std::fs::File> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SchedulerError::TaskExecution(format!("create log dir: {e}")))?;
        }
        std::fs::File::create(path)
            .map_err(|e| SchedulerError::TaskExecution(format!("create log file: {e}")))
    }

    /// Push an existing task log to the shared store on demand.
    pub async fn upload_log(&self, task_id: &str) -> SchedulerResult<()> {
        let log_path = self.local_log_path(task_id);
        if !tokio::fs::try_exists(&log_path).await.unwrap_or(false) {
            return Err(SchedulerError::ArtifactNotFound(
                log_path.display().to_string(),
            ));
        }
        self.artifacts
            .upload(&log_path, "logs", &format!("{task_id}.log"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use taskmaster_testing_utils::mocks::MockArtifactStore;

    struct RecordingSink {
        reports: Mutex<Vec<TaskCallbackRequest>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                reports: Mutex::new(Vec::new()),
            })
        }

        fn reports(&self) -> Vec<TaskCallbackRequest> {
            self.reports.lock().unwrap().clone()
        }

        async fn wait_for_reports(&self, count: usize) -> Vec<TaskCallbackRequest> {
            for _ in 0..100 {
                let reports = self.reports();
                if reports.len() >= count {
                    return reports;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            panic!("timed out waiting for {count} result reports");
        }
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn report(&self, req: &TaskCallbackRequest) -> SchedulerResult<()> {
            self.reports.lock().unwrap().push(req.clone());
            Ok(())
        }
    }

    struct Fixture {
        executor: Arc<TaskExecutor>,
        artifacts: Arc<MockArtifactStore>,
        sink: Arc<RecordingSink>,
        _dirs: (tempfile::TempDir, tempfile::TempDir),
    }

    fn fixture() -> Fixture {
        let script_dir = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();
        let config = WorkerProcessConfig {
            script_dir: script_dir.path().display().to_string(),
            log_dir: log_dir.path().display().to_string(),
            process_poll_interval_ms: 50,
            ..Default::default()
        };
        let artifacts = Arc::new(MockArtifactStore::new());
        let sink = RecordingSink::new();
        let executor = TaskExecutor::new(
            config,
            Arc::clone(&artifacts) as Arc<dyn ArtifactStore>,
            Arc::clone(&sink) as Arc<dyn ResultSink>,
        );
        Fixture {
            executor,
            artifacts,
            sink,
            _dirs: (script_dir, log_dir),
        }
    }

    fn assignment(task_id: &str, job_id: &str) -> TaskAssignment {
        TaskAssignment {
            task_id: task_id.to_string(),
            job_id: job_id.to_string(),
            script: "run.sh".to_string(),
            state: TaskState::Running,
        }
    }

    #[tokio::test]
    async fn test_successful_script_reports_success() {
        let f = fixture();
        f.artifacts
            .put_file("scripts/g1", "run.sh", b"#!/bin/sh\necho done\nexit 0\n");

        f.executor.spawn("w1".to_string(), assignment("t1", "g1"));
        let reports = f.sink.wait_for_reports(1).await;
        assert_eq!(reports[0].state, TaskState::Success);
        assert_eq!(reports[0].task_id, "t1");

        // stdout captured and uploaded
        let log = f.artifacts.uploaded("logs", "t1.log").unwrap();
        assert!(String::from_utf8_lossy(&log).contains("done"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_fail() {
        let f = fixture();
        f.artifacts
            .put_file("scripts/g1", "run.sh", b"#!/bin/sh\nexit 3\n");

        f.executor.spawn("w1".to_string(), assignment("t1", "g1"));
        let reports = f.sink.wait_for_reports(1).await;
        assert_eq!(reports[0].state, TaskState::Fail);
    }

    #[tokio::test]
    async fn test_download_failure_never_spawns() {
        let f = fixture();
        f.artifacts.set_fail_download(true);

        f.executor.spawn("w1".to_string(), assignment("t1", "g1"));
        let reports = f.sink.wait_for_reports(1).await;
        assert_eq!(reports[0].state, TaskState::DownloadFail);
        assert_eq!(f.artifacts.upload_calls(), 0);
    }

    #[tokio::test]
    async fn test_script_cached_per_job_group() {
        let f = fixture();
        f.artifacts
            .put_file("scripts/g1", "run.sh", b"#!/bin/sh\nexit 0\n");

        f.executor.spawn("w1".to_string(), assignment("t1", "g1"));
        f.sink.wait_for_reports(1).await;
        f.executor.spawn("w1".to_string(), assignment("t2", "g1"));
        f.sink.wait_for_reports(2).await;

        assert_eq!(f.artifacts.download_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_kills_running_task() {
        let f = fixture();
        f.artifacts
            .put_file("scripts/g1", "run.sh", b"#!/bin/sh\nsleep 30\n");

        f.executor.spawn("w1".to_string(), assignment("t1", "g1"));
        // wait until the child is actually running
        for _ in 0..100 {
            if f.executor.running_tasks() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        f.executor.cancel(&["t1".to_string()]).await;
        let reports = f.sink.wait_for_reports(1).await;
        assert_eq!(reports[0].state, TaskState::RunningTimeout);
        assert_eq!(f.executor.running_tasks(), 0);
    }

    #[tokio::test]
    async fn test_cancel_reaches_task_queued_on_semaphore() {
        let script_dir = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();
        let config = WorkerProcessConfig {
            script_dir: script_dir.path().display().to_string(),
            log_dir: log_dir.path().display().to_string(),
            process_poll_interval_ms: 50,
            max_tasks: 1,
            ..Default::default()
        };
        let artifacts = Arc::new(MockArtifactStore::new());
        artifacts.put_file("scripts/g1", "run.sh", b"#!/bin/sh\nsleep 30\n");
        let sink = RecordingSink::new();
        let executor = TaskExecutor::new(
            config,
            Arc::clone(&artifacts) as Arc<dyn ArtifactStore>,
            Arc::clone(&sink) as Arc<dyn ResultSink>,
        );

        // t1占满唯一的执行槽位，t2只能排队
        executor.spawn("w1".to_string(), assignment("t1", "g1"));
        for _ in 0..100 {
            if executor.running_tasks() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        executor.spawn("w1".to_string(), assignment("t2", "g1"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 排队中的任务也要能被取消，不能等它白跑一遍
        executor.cancel(&["t2".to_string()]).await;
        let reports = sink.wait_for_reports(1).await;
        assert_eq!(reports[0].task_id, "t2");
        assert_eq!(reports[0].state, TaskState::RunningTimeout);
        assert_eq!(executor.running_tasks(), 1);

        executor.cancel(&["t1".to_string()]).await;
        let reports = sink.wait_for_reports(2).await;
        assert!(reports
            .iter()
            .all(|r| r.state == TaskState::RunningTimeout));
    }

    #[tokio::test]
    async fn test_listener_fires_before_callback() {
        struct Recorder(Mutex<Vec<(String, TaskState)>>);
        impl TaskListener for Recorder {
            fn on_task_done(&self, task_id: &str, state: TaskState) {
                self.0.lock().unwrap().push((task_id.to_string(), state));
            }
        }

        let script_dir = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();
        let config = WorkerProcessConfig {
            script_dir: script_dir.path().display().to_string(),
            log_dir: log_dir.path().display().to_string(),
            process_poll_interval_ms: 50,
            ..Default::default()
        };
        let artifacts = Arc::new(MockArtifactStore::new());
        artifacts.put_file("scripts/g1", "run.sh", b"#!/bin/sh\nexit 0\n");
        let sink = RecordingSink::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let executor = TaskExecutor::with_listener(
            config,
            Arc::clone(&artifacts) as Arc<dyn ArtifactStore>,
            Arc::clone(&sink) as Arc<dyn ResultSink>,
            Some(Arc::clone(&recorder) as Arc<dyn TaskListener>),
        );

        executor.spawn("w1".to_string(), assignment("t1", "g1"));
        sink.wait_for_reports(1).await;
        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen, vec![("t1".to_string(), TaskState::Success)]);
    }

    #[tokio::test]
    async fn test_handle_drains_cancels_and_log_requests() {
        let f = fixture();
        f.artifacts
            .put_file("scripts/g1", "run.sh", b"#!/bin/sh\necho hi\n");

        f.executor.spawn("w1".to_string(), assignment("t1", "g1"));
        f.sink.wait_for_reports(1).await;

        let resp = PullResponse {
            log_requests: vec!["t1".to_string()],
            cancels: vec!["ghost".to_string()],
            ..Default::default()
        };
        f.executor.handle("w1", resp).await;
        assert!(f.artifacts.uploaded("logs", "t1.log").is_some());
    }
}
