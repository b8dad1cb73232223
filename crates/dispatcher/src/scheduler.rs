use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    entities::{Task, TaskFilter, TaskPage, TaskStatus, TaskTransition},
    repositories::TaskRepository,
    value_objects::{TaskPayload, TaskPriority, TaskTrigger},
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};
use scheduler_worker::PoolManager;

/// 入队请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTaskRequest {
    pub name: String,
    pub command_name: String,
    #[serde(default)]
    pub payload: TaskPayload,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub trigger: TaskTrigger,
    #[serde(default)]
    pub scheduled_task_id: Option<i64>,
}

impl QueueTaskRequest {
    pub fn new(name: impl Into<String>, command_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command_name: command_name.into(),
            payload: TaskPayload::new(),
            priority: TaskPriority::default(),
            trigger: TaskTrigger::default(),
            scheduled_task_id: None,
        }
    }

    pub fn with_payload(mut self, payload: TaskPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_trigger(mut self, trigger: TaskTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_scheduled_task(mut self, scheduled_task_id: i64) -> Self {
        self.scheduled_task_id = Some(scheduled_task_id);
        self
    }
}

/// 任务入口：入队、查询和取消
pub struct TaskScheduler {
    task_repo: Arc<dyn TaskRepository>,
    pools: Arc<PoolManager>,
    metrics: MetricsCollector,
}

impl TaskScheduler {
    pub fn new(task_repo: Arc<dyn TaskRepository>, pools: Arc<PoolManager>) -> Self {
        Self {
            task_repo,
            pools,
            metrics: MetricsCollector::new(),
        }
    }

    /// 持久化为 Queued 后按优先级放入工作池，返回带 ID 的任务
    pub async fn queue_task(&self, request: QueueTaskRequest) -> SchedulerResult<Task> {
        if request.command_name.trim().is_empty() {
            return Err(SchedulerError::InvalidTaskParams(
                "命令名不能为空".to_string(),
            ));
        }

        if self.pools.is_shutting_down() {
            return Err(SchedulerError::EngineShutdown);
        }

        let mut task = Task::new(
            request.name,
            request.command_name,
            request.payload,
            request.priority,
            request.trigger,
        );
        task.scheduled_task_id = request.scheduled_task_id;

        let task = self.task_repo.create(&task).await?;
        if let Err(e) = self.pools.enqueue(task.id, task.priority) {
            // 持久化期间开始关闭：任务不会被执行，直接结束
            let transition = TaskTransition::abort(task.id).from_states(&[TaskStatus::Queued]);
            if let Err(abort_error) = self.task_repo.transition(&transition).await {
                warn!("任务 {} 入队被拒绝后标记 Aborted 失败: {}", task.id, abort_error);
            }
            return Err(e);
        }

        StructuredLogger::log_task_queued(
            task.id,
            &task.name,
            &task.command_name,
            task.priority.as_str(),
            task.trigger.as_str(),
        );
        self.metrics
            .record_task_queued(task.priority.pool_name(), task.trigger.as_str());
        Ok(task)
    }

    pub async fn get_task(&self, id: i64) -> SchedulerResult<Option<Task>> {
        self.task_repo.get_by_id(id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> SchedulerResult<TaskPage> {
        self.task_repo.list(filter).await
    }

    /// 取消任务，返回操作后的任务快照
    ///
    /// 排队中的任务直接移出队列并标记 Aborted；执行中的任务收到取消信号并标记
    /// Cancelling，由工作者在处理器返回后写入 Aborted；终态任务保持不变。
    pub async fn cancel_task(&self, id: i64) -> SchedulerResult<Task> {
        let task = self
            .task_repo
            .get_by_id(id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id })?;

        StructuredLogger::log_task_cancel_requested(id, task.status.as_str());
        if task.is_terminal() {
            self.metrics.record_cancel_request("already_terminal");
            return Ok(task);
        }

        if self.pools.remove_queued(id, task.priority) {
            let transition = TaskTransition::abort(id).from_states(&[TaskStatus::Queued]);
            self.task_repo.transition(&transition).await?;
            self.metrics.record_cancel_request("dequeued");
        } else if self.pools.signal_cancel(id) {
            // 已出队但尚未写入 Running：由存储的比较并交换决定，
            // 抢先写入 Aborted 后工作者的 start 转换不会生效
            let before_start = TaskTransition::abort(id).from_states(&[TaskStatus::Queued]);
            if self.task_repo.transition(&before_start).await? {
                self.metrics.record_cancel_request("aborted_before_start");
            } else {
                if !self
                    .task_repo
                    .transition(&TaskTransition::cancelling(id))
                    .await?
                {
                    debug!("任务 {} 未处于 Running，跳过 Cancelling", id);
                }
                self.metrics.record_cancel_request("signalled");
            }
        } else {
            // 既不在队列也不在执行中，例如引擎尚未恢复的遗留任务
            let transition = TaskTransition::abort(id).from_states(&[TaskStatus::Queued]);
            self.task_repo.transition(&transition).await?;
            self.metrics.record_cancel_request("orphaned");
        }

        Ok(self.task_repo.get_by_id(id).await?.unwrap_or(task))
    }
}
