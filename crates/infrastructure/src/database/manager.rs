use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use scheduler_core::{DatabaseConfig, SchedulerResult};
use scheduler_domain::repositories::{ScheduledTaskRepository, TaskRepository};

use super::sqlite::{migrations::run_migrations, SqliteScheduledTaskRepository, SqliteTaskRepository};

/// 数据库管理器，持有连接池并负责建表
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// 按配置连接数据库并运行迁移
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let mut connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // 内存数据库随最后一个连接消失，只能使用单个常驻连接
        let pool_options = if config.is_in_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
            let parent = connect_options.get_filename().parent();
            if let Some(dir) = parent.filter(|dir| !dir.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    scheduler_core::SchedulerError::DatabaseOperation(format!(
                        "创建数据库目录失败 {}: {e}",
                        dir.display()
                    ))
                })?;
            }
            SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
        };

        debug!("连接数据库: {}", config.url);
        let pool = pool_options
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(connect_options)
            .await?;

        run_migrations(&pool).await?;
        info!("数据库已就绪: {}", config.url);

        Ok(Self { pool })
    }

    /// 使用私有内存数据库，主要用于测试
    pub async fn in_memory() -> SchedulerResult<Self> {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        Self::new(&config).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        Arc::new(SqliteTaskRepository::new(self.pool.clone()))
    }

    pub fn scheduled_task_repository(&self) -> Arc<dyn ScheduledTaskRepository> {
        Arc::new(SqliteScheduledTaskRepository::new(self.pool.clone()))
    }
}
