use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    repositories::ScheduledTaskRepository,
    scheduled_task::ScheduledTask,
    value_objects::{TaskPayload, TaskPriority},
};

const SCHEDULED_TASK_COLUMNS: &str = "id, name, command_name, payload, interval_seconds, \
     priority, enabled, last_run, next_run, created_at, updated_at";

pub struct SqliteScheduledTaskRepository {
    pool: SqlitePool,
}

impl SqliteScheduledTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_scheduled_task(row: &SqliteRow) -> SchedulerResult<ScheduledTask> {
        let payload: String = row.try_get("payload")?;
        let priority: String = row.try_get("priority")?;

        Ok(ScheduledTask {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            command_name: row.try_get("command_name")?,
            payload: serde_json::from_str::<TaskPayload>(&payload)?,
            interval_seconds: row.try_get("interval_seconds")?,
            priority: priority.parse::<TaskPriority>()?,
            enabled: row.try_get("enabled")?,
            last_run: row.try_get("last_run")?,
            next_run: row.try_get("next_run")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ScheduledTaskRepository for SqliteScheduledTaskRepository {
    #[instrument(skip(self, task), fields(name = %task.name, command = %task.command_name))]
    async fn create(&self, task: &ScheduledTask) -> SchedulerResult<ScheduledTask> {
        let payload_json = serde_json::to_string(&task.payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_tasks (name, command_name, payload, interval_seconds, priority,
                                         enabled, last_run, next_run, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&task.name)
        .bind(&task.command_name)
        .bind(payload_json)
        .bind(task.interval_seconds)
        .bind(task.priority.as_str())
        .bind(task.enabled)
        .bind(task.last_run)
        .bind(task.next_run)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        let mut created = task.clone();
        created.id = result.last_insert_rowid();
        debug!("创建周期任务成功: ID {}, 间隔 {} 秒", created.id, created.interval_seconds);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<ScheduledTask>> {
        let sql = format!("SELECT {SCHEDULED_TASK_COLUMNS} FROM scheduled_tasks WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_scheduled_task).transpose()
    }

    async fn list_all(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        let sql = format!("SELECT {SCHEDULED_TASK_COLUMNS} FROM scheduled_tasks ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_scheduled_task).collect()
    }

    async fn find_due(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<ScheduledTask>> {
        let sql = format!(
            "SELECT {SCHEDULED_TASK_COLUMNS} FROM scheduled_tasks \
             WHERE enabled = 1 AND next_run <= $1 ORDER BY next_run, id"
        );
        let rows = sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_scheduled_task).collect()
    }

    #[instrument(skip(self, task), fields(scheduled_task_id = %task.id))]
    async fn update(&self, task: &ScheduledTask) -> SchedulerResult<()> {
        let payload_json = serde_json::to_string(&task.payload)?;

        let result = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET name = $1, command_name = $2, payload = $3, interval_seconds = $4, priority = $5,
                enabled = $6, last_run = $7, next_run = $8, updated_at = $9
            WHERE id = $10
            "#,
        )
        .bind(&task.name)
        .bind(&task.command_name)
        .bind(payload_json)
        .bind(task.interval_seconds)
        .bind(task.priority.as_str())
        .bind(task.enabled)
        .bind(task.last_run)
        .bind(task.next_run)
        .bind(task.updated_at)
        .bind(task.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::ScheduledTaskNotFound { id: task.id });
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> SchedulerResult<bool> {
        let result = sqlx::query("DELETE FROM scheduled_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
