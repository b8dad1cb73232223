use sqlx::SqlitePool;
use tracing::debug;

use scheduler_core::SchedulerResult;

/// 运行数据库迁移，所有语句幂等
pub async fn run_migrations(pool: &SqlitePool) -> SchedulerResult<()> {
    debug!("Running SQLite database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            command_name TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            interval_seconds INTEGER NOT NULL,
            priority TEXT NOT NULL DEFAULT 'NORMAL',
            enabled BOOLEAN NOT NULL DEFAULT 1,
            last_run DATETIME NOT NULL,
            next_run DATETIME NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            command_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'QUEUED',
            priority TEXT NOT NULL DEFAULT 'NORMAL',
            trigger_type TEXT NOT NULL DEFAULT 'API',
            payload TEXT NOT NULL DEFAULT '{}',
            progress_percent INTEGER NOT NULL DEFAULT 0,
            status_messages TEXT NOT NULL DEFAULT '[]',
            scheduled_task_id INTEGER,
            queued_at DATETIME NOT NULL,
            started_at DATETIME,
            ended_at DATETIME,
            exception TEXT,
            FOREIGN KEY (scheduled_task_id) REFERENCES scheduled_tasks(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_command_name ON tasks(command_name)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_queued_at ON tasks(queued_at)",
        "CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_next_run ON scheduled_tasks(enabled, next_run)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
