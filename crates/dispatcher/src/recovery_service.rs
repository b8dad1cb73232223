//! 启动恢复
//!
//! 进程崩溃后存储中可能残留 Running / Cancelling / Queued 的任务，启动时统一整理：
//! 执行中的任务标记为 Aborted，排队中的任务按入队顺序重新放回工作池。

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use scheduler_core::{RecoveryConfig, SchedulerResult};
use scheduler_domain::{
    entities::{TaskStatus, TaskTransition},
    repositories::TaskRepository,
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};
use scheduler_worker::PoolManager;

/// 恢复报告
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub aborted: Vec<i64>,
    pub requeued: Vec<i64>,
    pub recovery_duration_ms: u64,
}

pub struct TaskRecoveryService {
    task_repo: Arc<dyn TaskRepository>,
    pools: Arc<PoolManager>,
    config: RecoveryConfig,
    metrics: MetricsCollector,
}

impl TaskRecoveryService {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        pools: Arc<PoolManager>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            task_repo,
            pools,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// 必须在工作池启动之前调用，否则可能与工作者争抢同一任务
    pub async fn recover(&self) -> SchedulerResult<RecoveryReport> {
        let start = Instant::now();
        info!("开始恢复遗留任务");

        let mut report = RecoveryReport::default();

        let interrupted = self
            .task_repo
            .find_by_statuses(&[TaskStatus::Running, TaskStatus::Cancelling])
            .await?;
        for task in interrupted {
            let transition = TaskTransition::abort(task.id)
                .from_states(&[TaskStatus::Running, TaskStatus::Cancelling]);
            if self.task_repo.transition(&transition).await? {
                warn!("任务 {} 在上次运行中被中断（{}），标记为 Aborted", task.id, task.status);
                report.aborted.push(task.id);
            }
        }

        let queued = self.task_repo.find_by_statuses(&[TaskStatus::Queued]).await?;
        for task in queued {
            if self.config.requeue_queued {
                if self.pools.is_queued(task.id, task.priority) {
                    debug!("任务 {} 已在队列中，跳过", task.id);
                    continue;
                }
                self.pools.enqueue(task.id, task.priority)?;
                report.requeued.push(task.id);
            } else {
                let transition =
                    TaskTransition::abort(task.id).from_states(&[TaskStatus::Queued]);
                if self.task_repo.transition(&transition).await? {
                    report.aborted.push(task.id);
                }
            }
        }

        report.recovery_duration_ms = start.elapsed().as_millis() as u64;
        StructuredLogger::log_recovery_summary(report.aborted.len(), report.requeued.len());
        self.metrics
            .record_recovery(report.aborted.len(), report.requeued.len());

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    use scheduler_core::PoolsConfig;
    use scheduler_domain::value_objects::TaskPriority;
    use scheduler_testing_utils::{MockTaskRepository, TaskBuilder};
    use scheduler_worker::{HandlerRegistry, TaskExecutionManager};

    fn service(
        repo: Arc<MockTaskRepository>,
        requeue_queued: bool,
    ) -> (TaskRecoveryService, Arc<PoolManager>) {
        let registry = Arc::new(HandlerRegistry::new());
        let execution = Arc::new(TaskExecutionManager::new(repo.clone(), registry));
        let pools = Arc::new(PoolManager::new(&PoolsConfig::default(), execution));
        let service = TaskRecoveryService::new(
            repo,
            pools.clone(),
            RecoveryConfig { requeue_queued },
        );
        (service, pools)
    }

    fn leftovers() -> Vec<scheduler_domain::entities::Task> {
        let now = Utc::now();
        vec![
            TaskBuilder::new()
                .with_id(1)
                .with_status(TaskStatus::Running)
                .build(),
            TaskBuilder::new()
                .with_id(2)
                .with_status(TaskStatus::Cancelling)
                .build(),
            TaskBuilder::new()
                .with_id(3)
                .with_priority(TaskPriority::Low)
                .with_queued_at(now)
                .build(),
            TaskBuilder::new()
                .with_id(4)
                .with_queued_at(now - ChronoDuration::minutes(5))
                .build(),
            TaskBuilder::new()
                .with_id(5)
                .with_status(TaskStatus::Completed)
                .build(),
        ]
    }

    #[tokio::test]
    async fn test_recover_aborts_interrupted_and_requeues_queued() {
        let repo = Arc::new(MockTaskRepository::with_tasks(leftovers()));
        let (service, pools) = service(repo.clone(), true);

        let report = service.recover().await.unwrap();

        let mut aborted = report.aborted.clone();
        aborted.sort();
        assert_eq!(aborted, vec![1, 2]);
        // 按 queued_at 正序
        assert_eq!(report.requeued, vec![4, 3]);
        assert!(pools.is_queued(3, TaskPriority::Low));
        assert!(pools.is_queued(4, TaskPriority::Normal));

        let tasks = repo.get_all_tasks();
        assert_eq!(tasks[0].status, TaskStatus::Aborted);
        assert!(tasks[0].ended_at.is_some());
        assert_eq!(tasks[1].status, TaskStatus::Aborted);
        assert_eq!(tasks[4].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_recover_without_requeue_aborts_queued() {
        let repo = Arc::new(MockTaskRepository::with_tasks(leftovers()));
        let (service, pools) = service(repo.clone(), false);

        let report = service.recover().await.unwrap();
        assert_eq!(report.aborted.len(), 4);
        assert!(report.requeued.is_empty());
        assert_eq!(pools.queue_status().total_queued(), 0);
    }

    #[tokio::test]
    async fn test_recover_is_idempotent() {
        let repo = Arc::new(MockTaskRepository::with_tasks(leftovers()));
        let (service, pools) = service(repo, true);

        service.recover().await.unwrap();
        let second = service.recover().await.unwrap();
        assert!(second.aborted.is_empty());
        assert!(second.requeued.is_empty());
        assert_eq!(pools.queue_status().total_queued(), 2);
    }
}
