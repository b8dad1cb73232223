//! 任务处理器接口
//!
//! 处理器是业务层注册到引擎的可执行单元，按命令名查找。引擎对每次任务执行
//! 只调用一次 [`TaskHandler::execute`]，返回的错误和处理器内部的 panic 都视为任务失败。
//!
//! 取消是协作式的：处理器必须在自身的挂起点观察 [`TaskContext`] 中的取消令牌，
//! 忽略取消信号的处理器永远不会进入 Aborted。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::entities::Task;

/// 处理器执行上下文
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: i64,
    cancellation: CancellationToken,
}

impl TaskContext {
    pub fn new(task_id: i64, cancellation: CancellationToken) -> Self {
        Self {
            task_id,
            cancellation,
        }
    }

    pub fn task_id(&self) -> i64 {
        self.task_id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// 等待取消信号，适合放在 `tokio::select!` 分支中
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

/// 进度回调
///
/// 每次调用更新完成百分比并追加一条状态消息。持久化失败只记录日志，
/// 不会中断处理器。
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, percent: i32, message: &str);
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 注册表中的键
    fn command_name(&self) -> &str;

    /// 展示名称
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn execute(
        &self,
        ctx: &TaskContext,
        task: &Task,
        progress: &dyn ProgressReporter,
    ) -> anyhow::Result<()>;
}

/// 处理器的自描述信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerDescriptor {
    pub command_name: String,
    pub name: String,
    pub description: String,
}

impl HandlerDescriptor {
    pub fn of(handler: &Arc<dyn TaskHandler>) -> Self {
        Self {
            command_name: handler.command_name().to_string(),
            name: handler.name().to_string(),
            description: handler.description().to_string(),
        }
    }
}
