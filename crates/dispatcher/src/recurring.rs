//! 周期任务管理
//!
//! 定时器每个周期扫描一次到期的定义，把它们物化为 Trigger = Scheduled 的普通任务。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use scheduler_core::{RecurringConfig, SchedulerError, SchedulerResult};
use scheduler_domain::{
    entities::Task,
    repositories::ScheduledTaskRepository,
    scheduled_task::{ScheduledTask, ScheduledTaskUpdate},
    value_objects::{TaskPayload, TaskPriority, TaskTrigger},
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

use crate::scheduler::{QueueTaskRequest, TaskScheduler};

/// 创建周期任务的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScheduledTaskRequest {
    pub name: String,
    pub command_name: String,
    #[serde(default)]
    pub payload: TaskPayload,
    pub interval_seconds: u64,
    #[serde(default)]
    pub priority: TaskPriority,
}

struct Timer {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct RecurringTaskManager {
    scheduled_repo: Arc<dyn ScheduledTaskRepository>,
    scheduler: Arc<TaskScheduler>,
    config: RecurringConfig,
    timer: Mutex<Option<Timer>>,
    metrics: MetricsCollector,
}

impl RecurringTaskManager {
    pub fn new(
        scheduled_repo: Arc<dyn ScheduledTaskRepository>,
        scheduler: Arc<TaskScheduler>,
        config: RecurringConfig,
    ) -> Self {
        Self {
            scheduled_repo,
            scheduler,
            config,
            timer: Mutex::new(None),
            metrics: MetricsCollector::new(),
        }
    }

    pub async fn create_scheduled_task(
        &self,
        request: CreateScheduledTaskRequest,
    ) -> SchedulerResult<ScheduledTask> {
        let definition = ScheduledTask::new(
            request.name,
            request.command_name,
            request.payload,
            Duration::from_secs(request.interval_seconds),
            request.priority,
            Utc::now(),
        )?;

        let created = self.scheduled_repo.create(&definition).await?;
        info!(
            "创建周期任务: ID {}, 命令 {}, 间隔 {} 秒, 下次执行 {}",
            created.id, created.command_name, created.interval_seconds, created.next_run
        );
        Ok(created)
    }

    pub async fn get_scheduled_task(&self, id: i64) -> SchedulerResult<Option<ScheduledTask>> {
        self.scheduled_repo.get_by_id(id).await
    }

    pub async fn get_scheduled_tasks(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        self.scheduled_repo.list_all().await
    }

    pub async fn update_scheduled_task(
        &self,
        id: i64,
        update: ScheduledTaskUpdate,
    ) -> SchedulerResult<ScheduledTask> {
        let mut definition = self
            .scheduled_repo
            .get_by_id(id)
            .await?
            .ok_or(SchedulerError::ScheduledTaskNotFound { id })?;

        if update.is_empty() {
            return Ok(definition);
        }

        definition.apply_update(&update, Utc::now())?;
        self.scheduled_repo.update(&definition).await?;
        debug!("更新周期任务: ID {}, 下次执行 {}", id, definition.next_run);
        Ok(definition)
    }

    /// 删除定义，已物化的任务不受影响
    pub async fn delete_scheduled_task(&self, id: i64) -> SchedulerResult<bool> {
        let deleted = self.scheduled_repo.delete(id).await?;
        if deleted {
            info!("删除周期任务: ID {}", id);
        }
        Ok(deleted)
    }

    /// 物化所有在 `now` 到期的定义，返回新入队的任务
    ///
    /// 每个定义相互独立：某个定义入队失败时不推进它的 `next_run`，下个周期重试。
    pub async fn run_due_now(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>> {
        let due = self.scheduled_repo.find_due(now).await?;
        let mut queued = Vec::with_capacity(due.len());

        for mut definition in due {
            let request = QueueTaskRequest::new(definition.name.clone(), definition.command_name.clone())
                .with_payload(definition.payload.clone())
                .with_priority(definition.priority)
                .with_trigger(TaskTrigger::Scheduled)
                .with_scheduled_task(definition.id);

            let task = match self.scheduler.queue_task(request).await {
                Ok(task) => task,
                Err(e) => {
                    error!("周期任务 {} 物化失败，下个周期重试: {}", definition.id, e);
                    self.metrics.record_materialization(false);
                    continue;
                }
            };

            if let Err(e) = definition.mark_materialized(now) {
                warn!("周期任务 {} 无法计算下次执行时间: {}", definition.id, e);
            }
            if let Err(e) = self.scheduled_repo.update(&definition).await {
                warn!(
                    "周期任务 {} 已物化为任务 {}，但更新下次执行时间失败: {}",
                    definition.id, task.id, e
                );
            }
            StructuredLogger::log_scheduled_task_materialized(
                definition.id,
                task.id,
                definition.next_run,
            );
            self.metrics.record_materialization(true);
            queued.push(task);
        }

        Ok(queued)
    }

    /// 启动定时器，未启用或已启动时不做任何事
    pub async fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("周期任务定时器已禁用");
            return;
        }

        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let manager = Arc::clone(self);
        let loop_token = token.clone();
        let tick = Duration::from_secs(self.config.tick_interval_seconds);
        let handle = tokio::spawn(async move { manager.run_timer(tick, loop_token).await });

        *timer = Some(Timer { token, handle });
        info!("周期任务定时器已启动，扫描间隔 {:?}", tick);
    }

    /// 停止定时器并等待正在进行的扫描结束
    pub async fn stop(&self) {
        let Some(timer) = self.timer.lock().await.take() else {
            return;
        };
        timer.token.cancel();
        if let Err(e) = timer.handle.await {
            warn!("周期任务定时器异常退出: {}", e);
        }
        info!("周期任务定时器已停止");
    }

    async fn run_timer(&self, tick: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_due_now(Utc::now()).await {
                        Ok(tasks) if !tasks.is_empty() => {
                            debug!("本轮物化了 {} 个周期任务", tasks.len());
                        }
                        Ok(_) => {}
                        Err(e) => error!("扫描到期周期任务失败: {}", e),
                    }
                }
                _ = token.cancelled() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use scheduler_core::PoolsConfig;
    use scheduler_domain::entities::TaskStatus;
    use scheduler_testing_utils::{MockScheduledTaskRepository, MockTaskRepository};
    use scheduler_worker::{HandlerRegistry, PoolManager, TaskExecutionManager};

    struct Fixture {
        task_repo: Arc<MockTaskRepository>,
        scheduled_repo: Arc<MockScheduledTaskRepository>,
        pools: Arc<PoolManager>,
        manager: Arc<RecurringTaskManager>,
    }

    fn fixture(config: RecurringConfig) -> Fixture {
        let task_repo = Arc::new(MockTaskRepository::new());
        let scheduled_repo = Arc::new(MockScheduledTaskRepository::new());
        let registry = Arc::new(HandlerRegistry::new());
        let execution = Arc::new(TaskExecutionManager::new(task_repo.clone(), registry));
        let pools = Arc::new(PoolManager::new(&PoolsConfig::default(), execution));
        let scheduler = Arc::new(TaskScheduler::new(task_repo.clone(), pools.clone()));
        let manager = Arc::new(RecurringTaskManager::new(
            scheduled_repo.clone(),
            scheduler,
            config,
        ));
        Fixture {
            task_repo,
            scheduled_repo,
            pools,
            manager,
        }
    }

    fn library_sync(interval_seconds: u64) -> CreateScheduledTaskRequest {
        CreateScheduledTaskRequest {
            name: "同步片库".to_string(),
            command_name: "library-sync".to_string(),
            payload: HashMap::new(),
            interval_seconds,
            priority: TaskPriority::Low,
        }
    }

    #[tokio::test]
    async fn test_create_scheduled_task() {
        let f = fixture(RecurringConfig::default());
        let created = f.manager.create_scheduled_task(library_sync(3600)).await.unwrap();

        assert!(created.id > 0);
        assert!(created.enabled);
        assert_eq!(created.next_run, created.last_run + created.interval());
        assert_eq!(f.manager.get_scheduled_tasks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_zero_interval() {
        let f = fixture(RecurringConfig::default());
        let result = f.manager.create_scheduled_task(library_sync(0)).await;
        assert!(matches!(result, Err(SchedulerError::InvalidTaskParams(_))));
        assert_eq!(f.scheduled_repo.count(), 0);
    }

    #[tokio::test]
    async fn test_create_and_update_reject_huge_interval() {
        let f = fixture(RecurringConfig::default());
        let result = f
            .manager
            .create_scheduled_task(library_sync(i64::MAX as u64))
            .await;
        assert!(matches!(result, Err(SchedulerError::InvalidTaskParams(_))));
        assert_eq!(f.scheduled_repo.count(), 0);

        let created = f.manager.create_scheduled_task(library_sync(60)).await.unwrap();
        let update = ScheduledTaskUpdate {
            interval_seconds: Some(i64::MAX),
            ..Default::default()
        };
        let result = f.manager.update_scheduled_task(created.id, update).await;
        assert!(matches!(result, Err(SchedulerError::InvalidTaskParams(_))));

        let stored = f.manager.get_scheduled_task(created.id).await.unwrap().unwrap();
        assert_eq!(stored.interval_seconds, 60);
        assert_eq!(stored.next_run, created.next_run);
    }

    #[tokio::test]
    async fn test_run_due_now_materializes_and_advances() {
        let f = fixture(RecurringConfig::default());
        let created = f.manager.create_scheduled_task(library_sync(60)).await.unwrap();

        // 未到期
        assert!(f.manager.run_due_now(created.created_at).await.unwrap().is_empty());

        let fire_at = created.next_run + chrono::Duration::seconds(5);
        let tasks = f.manager.run_due_now(fire_at).await.unwrap();
        assert_eq!(tasks.len(), 1);

        let task = &tasks[0];
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.trigger, TaskTrigger::Scheduled);
        assert_eq!(task.scheduled_task_id, Some(created.id));
        assert_eq!(task.priority, TaskPriority::Low);
        assert!(f.pools.is_queued(task.id, TaskPriority::Low));

        let after = f.manager.get_scheduled_task(created.id).await.unwrap().unwrap();
        assert_eq!(after.last_run, fire_at);
        assert_eq!(after.next_run, fire_at + chrono::Duration::seconds(60));

        // 同一时刻再次扫描不会重复物化
        assert!(f.manager.run_due_now(fire_at).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_definition_never_materializes() {
        let f = fixture(RecurringConfig::default());
        let created = f.manager.create_scheduled_task(library_sync(60)).await.unwrap();
        f.manager
            .update_scheduled_task(
                created.id,
                ScheduledTaskUpdate {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let far_future = created.next_run + chrono::Duration::days(30);
        assert!(f.manager.run_due_now(far_future).await.unwrap().is_empty());
        assert_eq!(f.task_repo.count(), 0);
    }

    #[tokio::test]
    async fn test_failed_materialization_keeps_next_run() {
        let f = fixture(RecurringConfig::default());
        let created = f.manager.create_scheduled_task(library_sync(60)).await.unwrap();
        f.task_repo.set_fail_writes(true);

        let fire_at = created.next_run + chrono::Duration::seconds(1);
        assert!(f.manager.run_due_now(fire_at).await.unwrap().is_empty());

        let unchanged = f.manager.get_scheduled_task(created.id).await.unwrap().unwrap();
        assert_eq!(unchanged.next_run, created.next_run);

        // 存储恢复后下个周期补上
        f.task_repo.set_fail_writes(false);
        assert_eq!(f.manager.run_due_now(fire_at).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_interval_recomputes_next_run() {
        let f = fixture(RecurringConfig::default());
        let created = f.manager.create_scheduled_task(library_sync(3600)).await.unwrap();

        let updated = f
            .manager
            .update_scheduled_task(
                created.id,
                ScheduledTaskUpdate {
                    interval_seconds: Some(120),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.next_run, created.last_run + chrono::Duration::seconds(120));
    }

    #[tokio::test]
    async fn test_update_and_delete_unknown_definition() {
        let f = fixture(RecurringConfig::default());
        let result = f
            .manager
            .update_scheduled_task(
                99,
                ScheduledTaskUpdate {
                    enabled: Some(true),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(SchedulerError::ScheduledTaskNotFound { id: 99 })));
        assert!(!f.manager.delete_scheduled_task(99).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_keeps_materialized_tasks() {
        let f = fixture(RecurringConfig::default());
        let created = f.manager.create_scheduled_task(library_sync(60)).await.unwrap();
        let tasks = f
            .manager
            .run_due_now(created.next_run)
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);

        assert!(f.manager.delete_scheduled_task(created.id).await.unwrap());
        assert!(f.manager.get_scheduled_task(created.id).await.unwrap().is_none());
        assert_eq!(f.task_repo.count(), 1);
    }

    #[tokio::test]
    async fn test_timer_start_and_stop() {
        let f = fixture(RecurringConfig {
            enabled: true,
            tick_interval_seconds: 1,
        });
        f.manager.start().await;
        // 重复启动无副作用
        f.manager.start().await;
        f.manager.stop().await;
        f.manager.stop().await;
    }

    #[tokio::test]
    async fn test_disabled_timer_does_not_start() {
        let f = fixture(RecurringConfig {
            enabled: false,
            tick_interval_seconds: 1,
        });
        f.manager.start().await;
        assert!(f.manager.timer.lock().await.is_none());
    }
}
