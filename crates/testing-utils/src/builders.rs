//! Test data builders for creating test entities
//!
//! Builder patterns with sensible defaults and easy customization.

use chrono::{DateTime, Duration, Utc};
use taskmaster_core::models::{JobGroup, ResourceSnapshot, Task, TaskState, Worker};

/// Builder for creating test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task {
                id: "task-1".to_string(),
                job_id: "group-1".to_string(),
                worker_id: None,
                state: TaskState::Pending,
                created_at: Utc::now(),
                done_time: None,
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.task.id = id.to_string();
        self
    }

    pub fn with_job_id(mut self, job_id: &str) -> Self {
        self.task.job_id = job_id.to_string();
        self
    }

    pub fn with_worker(mut self, worker_id: &str) -> Self {
        self.task.worker_id = Some(worker_id.to_string());
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.task.state = state;
        self
    }

    pub fn running_on(self, worker_id: &str) -> Self {
        self.with_worker(worker_id).with_state(TaskState::Running)
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Worker entities
pub struct WorkerBuilder {
    worker: Worker,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self {
            worker: Worker {
                id: "worker-1".to_string(),
                name: "worker".to_string(),
                resources: ResourceSnapshot::default(),
                running_tasks: 0,
                refresh_time: Utc::now(),
                registered_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.worker.id = id.to_string();
        self
    }

    pub fn with_running_tasks(mut self, count: i32) -> Self {
        self.worker.running_tasks = count;
        self
    }

    pub fn with_refresh_time(mut self, refresh_time: DateTime<Utc>) -> Self {
        self.worker.refresh_time = refresh_time;
        self
    }

    /// 心跳停在seconds秒之前
    pub fn stale_for(mut self, seconds: i64) -> Self {
        self.worker.refresh_time = Utc::now() - Duration::seconds(seconds);
        self
    }

    pub fn build(self) -> Worker {
        self.worker
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test JobGroup entities
pub struct JobGroupBuilder {
    group: JobGroup,
}

impl JobGroupBuilder {
    pub fn new() -> Self {
        Self {
            group: JobGroup {
                id: "group-1".to_string(),
                name: "test_group".to_string(),
                script: "run.sh".to_string(),
                fanout: 1,
                running_timeout_seconds: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.group.id = id.to_string();
        self
    }

    pub fn with_script(mut self, script: &str) -> Self {
        self.group.script = script.to_string();
        self
    }

    pub fn with_fanout(mut self, fanout: u32) -> Self {
        self.group.fanout = fanout;
        self
    }

    pub fn with_running_timeout(mut self, seconds: i64) -> Self {
        self.group.running_timeout_seconds = Some(seconds);
        self
    }

    pub fn build(self) -> JobGroup {
        self.group
    }
}

impl Default for JobGroupBuilder {
    fn default() -> Self {
        Self::new()
    }
}
