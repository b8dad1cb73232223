use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    entities::{Task, TaskFilter, TaskPage, TaskProgress, TaskStatus, TaskTransition},
    repositories::TaskRepository,
    value_objects::{TaskPayload, TaskPriority, TaskTrigger},
};

const TASK_COLUMNS: &str = "id, name, command_name, status, priority, trigger_type, payload, \
     progress_percent, status_messages, scheduled_task_id, queued_at, started_at, ended_at, exception";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<Task> {
        let status: String = row.try_get("status")?;
        let priority: String = row.try_get("priority")?;
        let trigger: String = row.try_get("trigger_type")?;
        let payload: String = row.try_get("payload")?;
        let status_messages: String = row.try_get("status_messages")?;

        Ok(Task {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            command_name: row.try_get("command_name")?,
            status: status.parse::<TaskStatus>()?,
            priority: priority.parse::<TaskPriority>()?,
            trigger: trigger.parse::<TaskTrigger>()?,
            payload: serde_json::from_str::<TaskPayload>(&payload)?,
            progress: TaskProgress {
                percent: row.try_get("progress_percent")?,
                status_messages: serde_json::from_str(&status_messages)?,
            },
            scheduled_task_id: row.try_get("scheduled_task_id")?,
            queued_at: row.try_get("queued_at")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            exception: row.try_get("exception")?,
        })
    }

    fn push_filter<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &'a TaskFilter) {
        builder.push(" WHERE 1 = 1");
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(command_name) = &filter.command_name {
            builder.push(" AND command_name = ").push_bind(command_name.as_str());
        }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(task_name = %task.name, command = %task.command_name))]
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let payload_json = serde_json::to_string(&task.payload)?;
        let messages_json = serde_json::to_string(&task.progress.status_messages)?;

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (name, command_name, status, priority, trigger_type, payload,
                               progress_percent, status_messages, scheduled_task_id, queued_at,
                               started_at, ended_at, exception)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&task.name)
        .bind(&task.command_name)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(task.trigger.as_str())
        .bind(payload_json)
        .bind(task.progress.percent)
        .bind(messages_json)
        .bind(task.scheduled_task_id)
        .bind(task.queued_at)
        .bind(task.started_at)
        .bind(task.ended_at)
        .bind(&task.exception)
        .execute(&self.pool)
        .await?;

        let mut created = task.clone();
        created.id = result.last_insert_rowid();
        debug!("创建任务成功: ID {}, 命令: {}", created.id, created.command_name);
        Ok(created)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self, progress), fields(task_id = %id, percent = progress.percent))]
    async fn update_progress(&self, id: i64, progress: &TaskProgress) -> SchedulerResult<()> {
        let messages_json = serde_json::to_string(&progress.status_messages)?;

        let result = sqlx::query(
            "UPDATE tasks SET progress_percent = $1, status_messages = $2 WHERE id = $3",
        )
        .bind(progress.percent)
        .bind(messages_json)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self, transition), fields(task_id = %transition.task_id, to = %transition.to))]
    async fn transition(&self, transition: &TaskTransition) -> SchedulerResult<bool> {
        transition.validate()?;

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE tasks SET status = ");
        builder.push_bind(transition.to.as_str());
        if transition.to == TaskStatus::Running {
            builder.push(", started_at = ").push_bind(transition.at);
        }
        if transition.to.is_terminal() {
            builder.push(", ended_at = ").push_bind(transition.at);
        }
        if let Some(exception) = &transition.exception {
            builder.push(", exception = ").push_bind(exception.as_str());
        }
        builder.push(" WHERE id = ").push_bind(transition.task_id);
        builder.push(" AND status IN (");
        let mut statuses = builder.separated(", ");
        for status in &transition.from {
            statuses.push_bind(status.as_str());
        }
        statuses.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        let applied = result.rows_affected() > 0;
        if !applied {
            debug!(
                "任务 {} 的状态不在 {:?} 中，转换到 {} 未生效",
                transition.task_id, transition.from, transition.to
            );
        }
        Ok(applied)
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<TaskPage> {
        let mut count_builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM tasks");
        Self::push_filter(&mut count_builder, filter);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {TASK_COLUMNS} FROM tasks"));
        Self::push_filter(&mut builder, filter);
        builder
            .push(" ORDER BY queued_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit.max(0))
            .push(" OFFSET ")
            .push_bind(filter.offset.max(0));

        let rows = builder.build().fetch_all(&self.pool).await?;
        let tasks = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<SchedulerResult<Vec<_>>>()?;

        Ok(TaskPage { tasks, total })
    }

    async fn find_by_statuses(&self, statuses: &[TaskStatus]) -> SchedulerResult<Vec<Task>> {
        if statuses.is_empty() {
            return Ok(vec![]);
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE status IN ("));
        let mut separated = builder.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(") ORDER BY queued_at ASC, id ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }
}
