//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则。引擎只通过这些接口访问存储。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{Task, TaskFilter, TaskPage, TaskProgress, TaskStatus, TaskTransition};
use crate::scheduled_task::ScheduledTask;
use scheduler_core::SchedulerResult;

/// 任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 持久化新任务并返回带有存储生成 ID 的记录
    async fn create(&self, task: &Task) -> SchedulerResult<Task>;
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>>;
    /// 只更新进度字段，不触碰状态
    async fn update_progress(&self, id: i64, progress: &TaskProgress) -> SchedulerResult<()>;
    /// 比较并交换式的状态转换，当前状态不在 `transition.from` 中时返回 `false`
    async fn transition(&self, transition: &TaskTransition) -> SchedulerResult<bool>;
    /// 按 queued_at 倒序分页查询，`total` 为忽略分页后的匹配总数
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<TaskPage>;
    /// 按 queued_at 正序返回处于给定状态的任务
    async fn find_by_statuses(&self, statuses: &[TaskStatus]) -> SchedulerResult<Vec<Task>>;
}

/// 周期任务仓储抽象
#[async_trait]
pub trait ScheduledTaskRepository: Send + Sync {
    async fn create(&self, task: &ScheduledTask) -> SchedulerResult<ScheduledTask>;
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<ScheduledTask>>;
    async fn list_all(&self) -> SchedulerResult<Vec<ScheduledTask>>;
    /// 已启用且 `next_run <= now` 的定义
    async fn find_due(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<ScheduledTask>>;
    async fn update(&self, task: &ScheduledTask) -> SchedulerResult<()>;
    async fn delete(&self, id: i64) -> SchedulerResult<bool>;
}
