//! 调度引擎
//!
//! 组合根：持有处理器注册表、工作池、任务调度器和周期任务管理器，
//! 对外提供统一的任务操作入口。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use scheduler_core::{AppConfig, SchedulerError, SchedulerResult};
use scheduler_domain::{
    entities::{Task, TaskFilter, TaskPage},
    ports::handler::{HandlerDescriptor, TaskHandler},
    repositories::{ScheduledTaskRepository, TaskRepository},
    scheduled_task::{ScheduledTask, ScheduledTaskUpdate},
};
use scheduler_infrastructure::{RetryPolicy, RetryingScheduledTaskRepository, RetryingTaskRepository};
use scheduler_worker::{HandlerRegistry, PoolManager, QueueStatus, TaskExecutionManager};

use crate::recovery_service::{RecoveryReport, TaskRecoveryService};
use crate::recurring::{CreateScheduledTaskRequest, RecurringTaskManager};
use crate::scheduler::{QueueTaskRequest, TaskScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Running,
    Stopped,
}

pub struct SchedulerEngineBuilder {
    config: AppConfig,
    task_repo: Option<Arc<dyn TaskRepository>>,
    scheduled_repo: Option<Arc<dyn ScheduledTaskRepository>>,
    registry: Option<Arc<HandlerRegistry>>,
}

impl SchedulerEngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            task_repo: None,
            scheduled_repo: None,
            registry: None,
        }
    }

    pub fn task_repository(mut self, repo: Arc<dyn TaskRepository>) -> Self {
        self.task_repo = Some(repo);
        self
    }

    pub fn scheduled_task_repository(mut self, repo: Arc<dyn ScheduledTaskRepository>) -> Self {
        self.scheduled_repo = Some(repo);
        self
    }

    /// 使用预先填充的处理器注册表
    pub fn handler_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 存储会被包装为带重试的仓储，重试策略来自 `persistence` 配置
    pub fn build(self) -> SchedulerResult<SchedulerEngine> {
        let task_repo = self
            .task_repo
            .ok_or_else(|| SchedulerError::Configuration("缺少任务仓储".to_string()))?;
        let scheduled_repo = self
            .scheduled_repo
            .ok_or_else(|| SchedulerError::Configuration("缺少周期任务仓储".to_string()))?;

        let policy = RetryPolicy::from_config(&self.config.persistence);
        let task_repo: Arc<dyn TaskRepository> =
            Arc::new(RetryingTaskRepository::new(task_repo, policy.clone()));
        let scheduled_repo: Arc<dyn ScheduledTaskRepository> =
            Arc::new(RetryingScheduledTaskRepository::new(scheduled_repo, policy));

        let registry = self.registry.unwrap_or_default();
        let execution = Arc::new(TaskExecutionManager::new(
            Arc::clone(&task_repo),
            Arc::clone(&registry),
        ));
        let pools = Arc::new(PoolManager::new(&self.config.pools, execution));
        let scheduler = Arc::new(TaskScheduler::new(Arc::clone(&task_repo), Arc::clone(&pools)));
        let recurring = Arc::new(RecurringTaskManager::new(
            scheduled_repo,
            Arc::clone(&scheduler),
            self.config.recurring.clone(),
        ));
        let recovery =
            TaskRecoveryService::new(task_repo, Arc::clone(&pools), self.config.recovery.clone());

        Ok(SchedulerEngine {
            registry,
            pools,
            scheduler,
            recurring,
            recovery,
            shutdown_timeout: Duration::from_secs(self.config.shutdown.timeout_seconds),
            state: Mutex::new(EngineState::Created),
        })
    }
}

pub struct SchedulerEngine {
    registry: Arc<HandlerRegistry>,
    pools: Arc<PoolManager>,
    scheduler: Arc<TaskScheduler>,
    recurring: Arc<RecurringTaskManager>,
    recovery: TaskRecoveryService,
    shutdown_timeout: Duration,
    state: Mutex<EngineState>,
}

impl SchedulerEngine {
    pub fn builder(config: AppConfig) -> SchedulerEngineBuilder {
        SchedulerEngineBuilder::new(config)
    }

    pub async fn state(&self) -> EngineState {
        *self.state.lock().await
    }

    /// 启动恢复、工作池和周期任务定时器
    ///
    /// 重复调用返回空报告；关闭后调用返回 `EngineShutdown`。
    pub async fn start(&self) -> SchedulerResult<RecoveryReport> {
        let mut state = self.state.lock().await;
        match *state {
            EngineState::Running => return Ok(RecoveryReport::default()),
            EngineState::Stopped => return Err(SchedulerError::EngineShutdown),
            EngineState::Created => {}
        }

        let report = self.recovery.recover().await?;
        self.pools.start().await;
        self.recurring.start().await;
        *state = EngineState::Running;

        info!(
            "调度引擎已启动: 恢复 {} 个中断任务, 重新入队 {} 个任务",
            report.aborted.len(),
            report.requeued.len()
        );
        Ok(report)
    }

    /// 先停止周期任务定时器，再取消执行中的处理器并等待工作者退出
    ///
    /// 返回 false 表示在超时时间内仍有工作者未退出。
    pub async fn shutdown(&self) -> bool {
        let mut state = self.state.lock().await;
        if *state == EngineState::Stopped {
            return true;
        }
        *state = EngineState::Stopped;
        drop(state);

        info!("开始关闭调度引擎");
        self.recurring.stop().await;
        let clean = self.pools.shutdown(self.shutdown_timeout).await;
        if clean {
            info!("调度引擎已关闭");
        } else {
            warn!("调度引擎关闭超时，部分处理器未响应取消");
        }
        clean
    }

    pub async fn queue_task(&self, request: QueueTaskRequest) -> SchedulerResult<Task> {
        self.ensure_accepting().await?;
        self.scheduler.queue_task(request).await
    }

    pub async fn get_task(&self, id: i64) -> SchedulerResult<Option<Task>> {
        self.scheduler.get_task(id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> SchedulerResult<TaskPage> {
        self.scheduler.list_tasks(filter).await
    }

    pub async fn cancel_task(&self, id: i64) -> SchedulerResult<Task> {
        self.scheduler.cancel_task(id).await
    }

    pub async fn create_scheduled_task(
        &self,
        request: CreateScheduledTaskRequest,
    ) -> SchedulerResult<ScheduledTask> {
        self.recurring.create_scheduled_task(request).await
    }

    pub async fn get_scheduled_task(&self, id: i64) -> SchedulerResult<Option<ScheduledTask>> {
        self.recurring.get_scheduled_task(id).await
    }

    pub async fn get_scheduled_tasks(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        self.recurring.get_scheduled_tasks().await
    }

    pub async fn update_scheduled_task(
        &self,
        id: i64,
        update: ScheduledTaskUpdate,
    ) -> SchedulerResult<ScheduledTask> {
        self.recurring.update_scheduled_task(id, update).await
    }

    pub async fn delete_scheduled_task(&self, id: i64) -> SchedulerResult<bool> {
        self.recurring.delete_scheduled_task(id).await
    }

    /// 立即物化所有在 `now` 到期的周期任务
    pub async fn run_due_scheduled_tasks(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>> {
        self.ensure_accepting().await?;
        self.recurring.run_due_now(now).await
    }

    pub fn get_queue_status(&self) -> QueueStatus {
        self.pools.queue_status()
    }

    /// 注册处理器，同名处理器会被替换并返回
    pub async fn register_handler(
        &self,
        handler: Arc<dyn TaskHandler>,
    ) -> Option<Arc<dyn TaskHandler>> {
        self.registry.register(handler).await
    }

    pub async fn list_handlers(&self) -> Vec<HandlerDescriptor> {
        self.registry.describe_all().await
    }

    pub fn handler_registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    async fn ensure_accepting(&self) -> SchedulerResult<()> {
        if *self.state.lock().await == EngineState::Stopped {
            return Err(SchedulerError::EngineShutdown);
        }
        Ok(())
    }
}
