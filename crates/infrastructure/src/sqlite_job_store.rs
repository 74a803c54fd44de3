use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use taskmaster_core::models::{JobGroup, Task, TaskState};
use taskmaster_core::traits::JobStore;
use taskmaster_core::{SchedulerError, SchedulerResult};

/// SQLite任务存储实现
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 连接数据库并初始化表结构
    pub async fn connect(database_url: &str) -> SchedulerResult<Self> {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
        use std::str::FromStr;

        debug!("连接SQLite任务存储: {}", database_url);

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                script TEXT NOT NULL,
                fanout INTEGER NOT NULL DEFAULT 1,
                running_timeout INTEGER,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                worker_id TEXT,
                state TEXT NOT NULL DEFAULT 'PENDING',
                created_at TEXT NOT NULL,
                done_time TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_job_id ON tasks (job_id)")
            .execute(pool)
            .await?;

        Ok(())
    }

    fn parse_time(raw: &str) -> SchedulerResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| SchedulerError::database_error(format!("时间字段解析失败: {e}")))
    }

    fn row_to_group(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<JobGroup> {
        Ok(JobGroup {
            id: row.get("id"),
            name: row.get("name"),
            script: row.get("script"),
            fanout: row.get::<i64, _>("fanout") as u32,
            running_timeout_seconds: row.get::<Option<i64>, _>("running_timeout"),
            created_at: Self::parse_time(&row.get::<String, _>("created_at"))?,
        })
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<Task> {
        let state_raw: String = row.get("state");
        let state = TaskState::parse(&state_raw)
            .ok_or_else(|| SchedulerError::database_error(format!("未知任务状态: {state_raw}")))?;
        let done_time = match row.get::<Option<String>, _>("done_time") {
            Some(raw) => Some(Self::parse_time(&raw)?),
            None => None,
        };
        Ok(Task {
            id: row.get("id"),
            job_id: row.get("job_id"),
            worker_id: row.get("worker_id"),
            state,
            created_at: Self::parse_time(&row.get::<String, _>("created_at"))?,
            done_time,
        })
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn get_job_group(&self, id: &str) -> SchedulerResult<Option<JobGroup>> {
        let row = sqlx::query("SELECT * FROM job_groups WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_group).transpose()
    }

    async fn list_job_groups(&self) -> SchedulerResult<Vec<JobGroup>> {
        let rows = sqlx::query("SELECT * FROM job_groups ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_group).collect()
    }

    async fn insert_job_group(&self, group: &JobGroup) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_groups (id, name, script, fanout, running_timeout, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                script = excluded.script,
                fanout = excluded.fanout,
                running_timeout = excluded.running_timeout
            "#,
        )
        .bind(&group.id)
        .bind(&group.name)
        .bind(&group.script)
        .bind(group.fanout as i64)
        .bind(group.running_timeout_seconds)
        .bind(group.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_job_group(&self, id: &str) -> SchedulerResult<()> {
        sqlx::query("DELETE FROM job_groups WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_task(&self, task: &Task) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, job_id, worker_id, state, created_at, done_time)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.job_id)
        .bind(&task.worker_id)
        .bind(task.state.as_str())
        .bind(task.created_at.to_rfc3339())
        .bind(task.done_time.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_task(
        &self,
        id: &str,
        state: TaskState,
        worker_id: Option<&str>,
        done_time: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = ?, worker_id = ?,
                done_time = COALESCE(?, done_time)
            WHERE id = ?
            "#,
        )
        .bind(state.as_str())
        .bind(worker_id)
        .bind(done_time.map(|t| t.to_rfc3339()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::task_not_found(id));
        }
        Ok(())
    }

    async fn get_task(&self, id: &str) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn list_tasks_for_group(&self, job_id: &str) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE job_id = ? ORDER BY created_at")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn delete_tasks_for_group(&self, job_id: &str) -> SchedulerResult<()> {
        sqlx::query("DELETE FROM tasks WHERE job_id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteJobStore {
        SqliteJobStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_group_round_trip() {
        let store = memory_store().await;
        let group = JobGroup::new("g1", "nightly", "run.sh", 3);
        store.insert_job_group(&group).await.unwrap();

        let loaded = store.get_job_group("g1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "nightly");
        assert_eq!(loaded.fanout, 3);

        // upsert语义
        let updated = JobGroup::new("g1", "nightly-v2", "run.sh", 5).with_running_timeout(600);
        store.insert_job_group(&updated).await.unwrap();
        let loaded = store.get_job_group("g1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "nightly-v2");
        assert_eq!(loaded.fanout, 5);
        assert_eq!(loaded.running_timeout_seconds, Some(600));
    }

    #[tokio::test]
    async fn test_task_state_persistence() {
        let store = memory_store().await;
        let task = Task::new("g1");
        store.insert_task(&task).await.unwrap();

        store
            .update_task(&task.id, TaskState::Running, Some("w1"), None)
            .await
            .unwrap();
        let done = Utc::now();
        store
            .update_task(&task.id, TaskState::Success, Some("w1"), Some(done))
            .await
            .unwrap();

        let loaded = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, TaskState::Success);
        assert!(loaded.done_time.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_task() {
        let store = memory_store().await;
        let result = store
            .update_task("missing", TaskState::Running, None, None)
            .await;
        assert!(matches!(result, Err(SchedulerError::TaskNotFound { .. })));
    }
}
