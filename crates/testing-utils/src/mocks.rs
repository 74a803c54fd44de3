//! Mock implementations for the core ports
//!
//! In-memory mocks for unit testing without a database or a shared
//! artifact store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskmaster_core::models::{JobGroup, Task, TaskState};
use taskmaster_core::traits::{ArtifactStore, JobStore};
use taskmaster_core::{SchedulerError, SchedulerResult};

/// Mock implementation of JobStore for testing
#[derive(Debug, Clone, Default)]
pub struct MockJobStore {
    groups: Arc<Mutex<HashMap<String, JobGroup>>>,
    tasks: Arc<Mutex<HashMap<String, Task>>>,
}

impl MockJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(groups: Vec<JobGroup>) -> Self {
        let store = Self::new();
        {
            let mut map = store.groups.lock().unwrap();
            for group in groups {
                map.insert(group.id.clone(), group);
            }
        }
        store
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn stored_task(&self, id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl JobStore for MockJobStore {
    async fn get_job_group(&self, id: &str) -> SchedulerResult<Option<JobGroup>> {
        Ok(self.groups.lock().unwrap().get(id).cloned())
    }

    async fn list_job_groups(&self) -> SchedulerResult<Vec<JobGroup>> {
        Ok(self.groups.lock().unwrap().values().cloned().collect())
    }

    async fn insert_job_group(&self, group: &JobGroup) -> SchedulerResult<()> {
        self.groups
            .lock()
            .unwrap()
            .insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn delete_job_group(&self, id: &str) -> SchedulerResult<()> {
        self.groups.lock().unwrap().remove(id);
        Ok(())
    }

    async fn insert_task(&self, task: &Task) -> SchedulerResult<()> {
        self.tasks
            .lock()
            .unwrap()
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
        let mut tasks = self.tasks.lock().unwrap();
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
        Ok(self.tasks.lock().unwrap().get(id).cloned())
    }

    async fn list_tasks_for_group(&self, job_id: &str) -> SchedulerResult<Vec<Task>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn delete_tasks_for_group(&self, job_id: &str) -> SchedulerResult<()> {
        self.tasks.lock().unwrap().retain(|_, t| t.job_id != job_id);
        Ok(())
    }
}

/// Mock implementation of ArtifactStore with failure injection
#[derive(Debug, Default)]
pub struct MockArtifactStore {
    fail_download: AtomicBool,
    fail_upload: AtomicBool,
    download_calls: AtomicUsize,
    upload_calls: AtomicUsize,
    /// remote_dir/remote_name -> file content
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_file(&self, remote_dir: &str, remote_name: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(format!("{remote_dir}/{remote_name}"), content.to_vec());
    }

    pub fn set_fail_download(&self, fail: bool) {
        self.fail_download.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_upload(&self, fail: bool) {
        self.fail_upload.store(fail, Ordering::SeqCst);
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn uploaded(&self, remote_dir: &str, remote_name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&format!("{remote_dir}/{remote_name}"))
            .cloned()
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn download(
        &self,
        local: &Path,
        remote_dir: &str,
        remote_name: &str,
    ) -> SchedulerResult<()> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_download.load(Ordering::SeqCst) {
            return Err(SchedulerError::ArtifactNotFound(format!(
                "{remote_dir}/{remote_name}"
            )));
        }
        let content = self
            .files
            .lock()
            .unwrap()
            .get(&format!("{remote_dir}/{remote_name}"))
            .cloned()
            .ok_or_else(|| {
                SchedulerError::ArtifactNotFound(format!("{remote_dir}/{remote_name}"))
            })?;
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SchedulerError::ArtifactStore(e.to_string()))?;
        }
        std::fs::write(local, content).map_err(|e| SchedulerError::ArtifactStore(e.to_string()))?;
        Ok(())
    }

    async fn upload(
        &self,
        local: &Path,
        remote_dir: &str,
        remote_name: &str,
    ) -> SchedulerResult<()> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(SchedulerError::ArtifactStore("上传失败（注入）".to_string()));
        }
        let content =
            std::fs::read(local).map_err(|e| SchedulerError::ArtifactStore(e.to_string()))?;
        self.put_file(remote_dir, remote_name, &content);
        Ok(())
    }

    async fn mkdir_if_not_exist(&self, _path: &str) -> SchedulerResult<()> {
        Ok(())
    }

    async fn isfile(&self, path: &str) -> SchedulerResult<bool> {
        Ok(self.files.lock().unwrap().contains_key(path))
    }

    async fn isdir(&self, _path: &str) -> SchedulerResult<bool> {
        Ok(false)
    }

    async fn isexist(&self, path: &str) -> SchedulerResult<bool> {
        self.isfile(path).await
    }
}
