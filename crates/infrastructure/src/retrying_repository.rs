//! 存储重试装饰器
//!
//! 包装任意仓储实现，对可重试的存储错误按固定间隔加随机抖动重试。
//! 重试耗尽后返回 [`SchedulerError::TaskStore`]，调用方据此区分存储故障和任务失败。
//!
//! 非幂等写入单独处理：状态转换在重试前重新读取任务，已处于目标状态即视为生效；
//! 创建只在能确定未写入时重试，其余错误直接作为存储故障返回，不会产生重复记录。

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;

use scheduler_core::{PersistenceConfig, SchedulerError, SchedulerResult};
use scheduler_domain::{
    entities::{Task, TaskFilter, TaskPage, TaskProgress, TaskStatus, TaskTransition},
    repositories::{ScheduledTaskRepository, TaskRepository},
    scheduled_task::ScheduledTask,
};

use crate::observability::{MetricsCollector, StructuredLogger};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    retry_interval: Duration,
    metrics: MetricsCollector,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_interval,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.retry_interval_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 执行存储操作，可重试错误最多尝试 `max_attempts` 次
    pub async fn run<T, F, Fut>(&self, operation: &str, f: F) -> SchedulerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SchedulerResult<T>>,
    {
        self.run_if(operation, SchedulerError::is_retryable, f).await
    }

    /// 与 [`RetryPolicy::run`] 相同，但只重试满足 `retry_if` 的错误
    pub async fn run_if<T, P, F, Fut>(
        &self,
        operation: &str,
        retry_if: P,
        mut f: F,
    ) -> SchedulerResult<T>
    where
        P: Fn(&SchedulerError) -> bool,
        F: FnMut() -> Fut,
        Fut: Future<Output = SchedulerResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if !retry_if(&e) => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    self.metrics.record_task_store_fault(operation);
                    return Err(SchedulerError::TaskStore(format!(
                        "{operation} 在 {attempt} 次尝试后仍失败: {e}"
                    )));
                }
                Err(e) => {
                    StructuredLogger::log_store_retry(
                        operation,
                        attempt,
                        self.max_attempts,
                        &e.to_string(),
                    );
                    self.metrics.record_store_retry(operation);
                    tokio::time::sleep(self.backoff()).await;
                    attempt += 1;
                }
            }
        }
    }

    /// 未重试的可重试错误意味着写入结果未知，按存储故障返回
    fn unknown_write_outcome(&self, operation: &str, error: SchedulerError) -> SchedulerError {
        if !error.is_retryable() || matches!(error, SchedulerError::TaskStore(_)) {
            return error;
        }
        self.metrics.record_task_store_fault(operation);
        SchedulerError::TaskStore(format!("{operation} 结果未知，未重试: {error}"))
    }

    fn backoff(&self) -> Duration {
        let base = self.retry_interval.as_millis() as u64;
        let jitter = rand::rng().random_range(0..=base / 4);
        Duration::from_millis(base + jitter)
    }
}

/// TaskRepository 的重试装饰器
pub struct RetryingTaskRepository {
    inner: Arc<dyn TaskRepository>,
    policy: RetryPolicy,
}

impl RetryingTaskRepository {
    pub fn new(inner: Arc<dyn TaskRepository>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl TaskRepository for RetryingTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        self.policy
            .run_if("task.create", SchedulerError::is_rejected_before_commit, || {
                self.inner.create(task)
            })
            .await
            .map_err(|e| self.policy.unknown_write_outcome("task.create", e))
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        self.policy
            .run("task.get_by_id", || self.inner.get_by_id(id))
            .await
    }

    async fn update_progress(&self, id: i64, progress: &TaskProgress) -> SchedulerResult<()> {
        self.policy
            .run("task.update_progress", || {
                self.inner.update_progress(id, progress)
            })
            .await
    }

    async fn transition(&self, transition: &TaskTransition) -> SchedulerResult<bool> {
        let failed_before = &AtomicBool::new(false);
        let inner = &self.inner;
        self.policy
            .run("task.transition", move || async move {
                // 上一次尝试可能已经提交，目标状态已写入时不再重复转换
                if failed_before.load(Ordering::SeqCst) {
                    let current = inner.get_by_id(transition.task_id).await?;
                    if current.is_some_and(|task| task.status == transition.to) {
                        return Ok(true);
                    }
                }
                let result = inner.transition(transition).await;
                if result.is_err() {
                    failed_before.store(true, Ordering::SeqCst);
                }
                result
            })
            .await
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<TaskPage> {
        self.policy
            .run("task.list", || self.inner.list(filter))
            .await
    }

    async fn find_by_statuses(&self, statuses: &[TaskStatus]) -> SchedulerResult<Vec<Task>> {
        self.policy
            .run("task.find_by_statuses", || {
                self.inner.find_by_statuses(statuses)
            })
            .await
    }
}

/// ScheduledTaskRepository 的重试装饰器
pub struct RetryingScheduledTaskRepository {
    inner: Arc<dyn ScheduledTaskRepository>,
    policy: RetryPolicy,
}

impl RetryingScheduledTaskRepository {
    pub fn new(inner: Arc<dyn ScheduledTaskRepository>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ScheduledTaskRepository for RetryingScheduledTaskRepository {
    async fn create(&self, task: &ScheduledTask) -> SchedulerResult<ScheduledTask> {
        self.policy
            .run_if(
                "scheduled_task.create",
                SchedulerError::is_rejected_before_commit,
                || self.inner.create(task),
            )
            .await
            .map_err(|e| self.policy.unknown_write_outcome("scheduled_task.create", e))
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<ScheduledTask>> {
        self.policy
            .run("scheduled_task.get_by_id", || self.inner.get_by_id(id))
            .await
    }

    async fn list_all(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        self.policy
            .run("scheduled_task.list_all", || self.inner.list_all())
            .await
    }

    async fn find_due(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<ScheduledTask>> {
        self.policy
            .run("scheduled_task.find_due", || self.inner.find_due(now))
            .await
    }

    async fn update(&self, task: &ScheduledTask) -> SchedulerResult<()> {
        self.policy
            .run("scheduled_task.update", || self.inner.update(task))
            .await
    }

    async fn delete(&self, id: i64) -> SchedulerResult<bool> {
        self.policy
            .run("scheduled_task.delete", || self.inner.delete(id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use mockall::Sequence;
    use scheduler_domain::value_objects::{TaskPriority, TaskTrigger};
    use std::collections::HashMap;

    mock! {
        pub TaskRepo {}

        #[async_trait]
        impl TaskRepository for TaskRepo {
            async fn create(&self, task: &Task) -> SchedulerResult<Task>;
            async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>>;
            async fn update_progress(&self, id: i64, progress: &TaskProgress) -> SchedulerResult<()>;
            async fn transition(&self, transition: &TaskTransition) -> SchedulerResult<bool>;
            async fn list(&self, filter: &TaskFilter) -> SchedulerResult<TaskPage>;
            async fn find_by_statuses(&self, statuses: &[TaskStatus]) -> SchedulerResult<Vec<Task>>;
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    fn sample_task() -> Task {
        Task::new(
            "生成缩略图".to_string(),
            "thumbnail".to_string(),
            HashMap::new(),
            TaskPriority::Low,
            TaskTrigger::Manual,
        )
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let mut mock = MockTaskRepo::new();
        let mut seq = Sequence::new();
        mock.expect_update_progress()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(SchedulerError::DatabaseOperation("database is locked".into())));
        mock.expect_update_progress()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let repo = RetryingTaskRepository::new(Arc::new(mock), fast_policy(3));
        assert!(repo.update_progress(7, &TaskProgress::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_as_store_fault() {
        let mut mock = MockTaskRepo::new();
        mock.expect_update_progress()
            .times(3)
            .returning(|_, _| Err(SchedulerError::Database(sqlx::Error::PoolTimedOut)));

        let repo = RetryingTaskRepository::new(Arc::new(mock), fast_policy(3));
        let result = repo.update_progress(7, &TaskProgress::default()).await;
        assert!(matches!(result, Err(SchedulerError::TaskStore(_))));
    }

    #[tokio::test]
    async fn test_non_retryable_error_returned_immediately() {
        let mut mock = MockTaskRepo::new();
        mock.expect_create()
            .times(1)
            .returning(|_| Err(SchedulerError::Serialization("bad payload".into())));

        let repo = RetryingTaskRepository::new(Arc::new(mock), fast_policy(5));
        let result = repo.create(&sample_task()).await;
        assert!(matches!(result, Err(SchedulerError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_committed_transition_is_not_reported_as_lost() {
        let mut mock = MockTaskRepo::new();
        mock.expect_transition()
            .times(1)
            .returning(|_| Err(SchedulerError::DatabaseOperation("connection reset".into())));
        mock.expect_get_by_id().times(1).returning(|id| {
            let mut task = sample_task();
            task.id = id;
            task.status = TaskStatus::Running;
            Ok(Some(task))
        });

        let repo = RetryingTaskRepository::new(Arc::new(mock), fast_policy(3));
        assert!(repo.transition(&TaskTransition::start(7)).await.unwrap());
    }

    #[tokio::test]
    async fn test_uncommitted_transition_is_retried_after_reread() {
        let mut mock = MockTaskRepo::new();
        let mut seq = Sequence::new();
        mock.expect_transition()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(SchedulerError::DatabaseOperation("connection reset".into())));
        mock.expect_get_by_id()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|id| {
                let mut task = sample_task();
                task.id = id;
                Ok(Some(task))
            });
        mock.expect_transition()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(true));

        let repo = RetryingTaskRepository::new(Arc::new(mock), fast_policy(3));
        assert!(repo.transition(&TaskTransition::start(7)).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_with_unknown_outcome_is_not_retried() {
        let mut mock = MockTaskRepo::new();
        mock.expect_create()
            .times(1)
            .returning(|_| Err(SchedulerError::DatabaseOperation("connection reset".into())));

        let repo = RetryingTaskRepository::new(Arc::new(mock), fast_policy(5));
        let result = repo.create(&sample_task()).await;
        assert!(matches!(result, Err(SchedulerError::TaskStore(_))));
    }

    #[tokio::test]
    async fn test_create_rejected_before_commit_is_retried() {
        let mut mock = MockTaskRepo::new();
        let mut seq = Sequence::new();
        mock.expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(SchedulerError::Database(sqlx::Error::PoolTimedOut)));
        mock.expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|task| {
                let mut created = task.clone();
                created.id = 11;
                Ok(created)
            });

        let repo = RetryingTaskRepository::new(Arc::new(mock), fast_policy(3));
        assert_eq!(repo.create(&sample_task()).await.unwrap().id, 11);
    }

    #[test]
    fn test_policy_requires_at_least_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        assert_eq!(policy.max_attempts(), 1);
    }
}
