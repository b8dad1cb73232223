use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("定时任务未找到: {id}")]
    ScheduledTaskNotFound { id: i64 },

    #[error("非法的任务状态转换: 任务 {id} 从 {from} 到 {to}")]
    InvalidTransition { id: i64, from: String, to: String },

    /// 存储不可用导致状态转换结果不确定，区别于任务自身失败
    #[error("任务存储故障: {0}")]
    TaskStore(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("调度引擎已关闭")]
    EngineShutdown,

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 是否为可重试的存储层错误
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Database(_)
            ),
            SchedulerError::DatabaseOperation(_) | SchedulerError::TaskStore(_) => true,
            _ => false,
        }
    }

    /// 能确定写入未生效的错误：未取得连接，或语句被数据库拒绝
    ///
    /// 连接中断等其他错误发生时写入可能已经提交。
    pub fn is_rejected_before_commit(&self) -> bool {
        matches!(
            self,
            SchedulerError::Database(
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Database(_)
            )
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;
