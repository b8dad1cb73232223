use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scheduler_core::SchedulerError;
use scheduler_domain::entities::{Task, TaskStatus, TaskTransition};
use scheduler_domain::ports::handler::TaskContext;
use scheduler_domain::repositories::TaskRepository;
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

use super::progress_tracker::TaskProgressTracker;
use crate::registry::HandlerRegistry;

/// 单个任务从出队到终态的完整生命周期
///
/// 执行中任务的取消令牌登记在 `running_tasks` 中。登记由工作池在持有队列锁时完成，
/// 注销与 [`TaskExecutionManager::signal_cancel`] 互斥，因此取消请求总能在
/// 队列或登记表二者之一中找到尚未结束的任务。
pub struct TaskExecutionManager {
    task_repo: Arc<dyn TaskRepository>,
    registry: Arc<HandlerRegistry>,
    running_tasks: Mutex<HashMap<i64, CancellationToken>>,
    metrics: MetricsCollector,
}

impl TaskExecutionManager {
    pub fn new(task_repo: Arc<dyn TaskRepository>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            task_repo,
            registry,
            running_tasks: Mutex::new(HashMap::new()),
            metrics: MetricsCollector::new(),
        }
    }

    fn running(&self) -> MutexGuard<'_, HashMap<i64, CancellationToken>> {
        self.running_tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn running_task_count(&self) -> usize {
        self.running().len()
    }

    pub fn is_running(&self, task_id: i64) -> bool {
        self.running().contains_key(&task_id)
    }

    pub(crate) fn register(&self, task_id: i64, token: CancellationToken) {
        self.running().insert(task_id, token);
    }

    /// 向已出队的任务发出取消信号，任务不在执行中时返回 false
    pub fn signal_cancel(&self, task_id: i64) -> bool {
        match self.running().get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 注销任务并返回其是否已被取消
    fn unregister(&self, task_id: i64) -> bool {
        self.running()
            .remove(&task_id)
            .is_some_and(|token| token.is_cancelled())
    }

    /// 执行一个已出队的任务，所有错误都在内部处理
    pub async fn execute(&self, task_id: i64, token: CancellationToken, pool: &str) {
        let started = Instant::now();

        let task = match self.task_repo.get_by_id(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!("任务 {} 不存在，跳过执行", task_id);
                self.unregister(task_id);
                return;
            }
            Err(e) => {
                self.unregister(task_id);
                self.report_store_fault(task_id, "get_by_id", &e);
                return;
            }
        };

        if task.status != TaskStatus::Queued {
            debug!("任务 {} 当前状态为 {}，跳过执行", task_id, task.status);
            self.unregister(task_id);
            return;
        }

        if token.is_cancelled() {
            self.unregister(task_id);
            let transition = TaskTransition::abort(task_id).from_states(&[TaskStatus::Queued]);
            self.finish(&task, transition, started).await;
            return;
        }

        let Some(handler) = self.registry.lookup(&task.command_name).await else {
            self.unregister(task_id);
            let exception = format!("no handler registered for command: {}", task.command_name);
            self.finish(&task, TaskTransition::fail(task_id, exception), started)
                .await;
            return;
        };

        match self.task_repo.transition(&TaskTransition::start(task_id)).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("任务 {} 已不处于排队状态，放弃执行", task_id);
                self.unregister(task_id);
                return;
            }
            Err(e) => {
                self.unregister(task_id);
                self.report_store_fault(task_id, "transition", &e);
                return;
            }
        }
        StructuredLogger::log_task_started(task_id, &task.command_name, pool);

        // 写入 Running 期间到达的取消请求：不再调用处理器
        if token.is_cancelled() {
            self.unregister(task_id);
            let transition = TaskTransition::abort(task_id)
                .from_states(&[TaskStatus::Running, TaskStatus::Cancelling]);
            self.finish(&task, transition, started).await;
            return;
        }

        let tracker = Arc::new(TaskProgressTracker::new(
            task_id,
            task.progress.clone(),
            Arc::clone(&self.task_repo),
        ));
        let outcome = {
            let ctx = TaskContext::new(task_id, token.clone());
            let tracker = Arc::clone(&tracker);
            let mut running_task = task.clone();
            running_task.status = TaskStatus::Running;
            // 处理器在独立的 tokio 任务中运行，panic 以 JoinError 的形式返回
            tokio::spawn(async move {
                handler
                    .execute(&ctx, &running_task, tracker.as_ref())
                    .await
            })
            .await
        };

        // 注销之后到达的取消请求不会再影响本任务
        let cancelled = self.unregister(task_id);

        if let Err(e) = tracker.close().await {
            self.report_store_fault(task_id, "update_progress", &e);
        }

        let in_flight = [TaskStatus::Running, TaskStatus::Cancelling];
        let transition = if cancelled {
            TaskTransition::abort(task_id).from_states(&in_flight)
        } else {
            match outcome {
                Ok(Ok(())) => TaskTransition::complete(task_id),
                Ok(Err(e)) => TaskTransition::fail(task_id, format!("{e:#}"))
                    .from_states(&[TaskStatus::Running]),
                Err(join_error) if join_error.is_cancelled() => {
                    TaskTransition::abort(task_id).from_states(&in_flight)
                }
                Err(join_error) => TaskTransition::fail(task_id, panic_message(join_error))
                    .from_states(&[TaskStatus::Running]),
            }
        };

        self.finish(&task, transition, started).await;
    }

    async fn finish(&self, task: &Task, transition: TaskTransition, started: Instant) {
        let status = transition.to;
        match self.task_repo.transition(&transition).await {
            Ok(true) => {
                let elapsed = started.elapsed();
                StructuredLogger::log_task_finished(
                    task.id,
                    &task.command_name,
                    status.as_str(),
                    elapsed.as_millis() as u64,
                    transition.exception.as_deref(),
                );
                self.metrics.record_task_finished(
                    &task.command_name,
                    status.as_str(),
                    elapsed.as_secs_f64(),
                );
            }
            Ok(false) => warn!(
                "任务 {} 未能进入 {}，状态已被其他操作修改",
                task.id, status
            ),
            Err(e) => self.report_store_fault(task.id, "transition", &e),
        }
    }

    fn report_store_fault(&self, task_id: i64, operation: &str, error: &SchedulerError) {
        StructuredLogger::log_task_store_fault(Some(task_id), operation, &error.to_string());
    }
}

fn panic_message(join_error: JoinError) -> String {
    match join_error.try_into_panic() {
        Ok(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            format!("handler panicked: {detail}")
        }
        Err(join_error) => format!("handler task failed: {join_error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_testing_utils::{
        BlockingHandler, FailingHandler, MockTaskRepository, PanickingHandler, RecordingHandler,
        TaskBuilder, TestEnv,
    };
    use std::time::Duration;

    struct Fixture {
        repo: Arc<MockTaskRepository>,
        registry: Arc<HandlerRegistry>,
        manager: Arc<TaskExecutionManager>,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(MockTaskRepository::new());
        let registry = Arc::new(HandlerRegistry::new());
        let manager = Arc::new(TaskExecutionManager::new(repo.clone(), registry.clone()));
        Fixture {
            repo,
            registry,
            manager,
        }
    }

    async fn queued(fixture: &Fixture, command: &str) -> Task {
        fixture
            .repo
            .create(&TaskBuilder::new().with_command(command).build())
            .await
            .unwrap()
    }

    async fn run(fixture: &Fixture, task_id: i64, token: CancellationToken) {
        fixture.manager.register(task_id, token.clone());
        fixture.manager.execute(task_id, token, "default").await;
    }

    #[tokio::test]
    async fn test_successful_execution_records_progress() {
        let fixture = fixture();
        let handler = RecordingHandler::new("refresh-metadata")
            .with_step(10, "M1")
            .with_step(60, "M2")
            .with_step(90, "M3");
        fixture.registry.register(Arc::new(handler.clone())).await;
        let task = queued(&fixture, "refresh-metadata").await;

        run(&fixture, task.id, CancellationToken::new()).await;

        let stored = fixture.repo.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.progress.status_messages, vec!["M1", "M2", "M3"]);
        assert_eq!(stored.progress.percent, 90);
        assert!(stored.started_at.is_some() && stored.ended_at.is_some());
        assert!(stored.exception.is_none());
        assert_eq!(handler.executions(), 1);
        assert_eq!(fixture.manager.running_task_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_handler_fails_task() {
        let fixture = fixture();
        let task = queued(&fixture, "does-not-exist").await;

        run(&fixture, task.id, CancellationToken::new()).await;

        let stored = fixture.repo.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(
            stored.exception.as_deref(),
            Some("no handler registered for command: does-not-exist")
        );
        assert!(stored.ended_at.is_some());
        assert!(stored.started_at.is_none());
    }

    #[tokio::test]
    async fn test_handler_error_fails_task() {
        let fixture = fixture();
        fixture
            .registry
            .register(Arc::new(FailingHandler::new("transcode", "ffmpeg not found")))
            .await;
        let task = queued(&fixture, "transcode").await;

        run(&fixture, task.id, CancellationToken::new()).await;

        let stored = fixture.repo.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.exception.as_deref(), Some("ffmpeg not found"));
    }

    #[tokio::test]
    async fn test_handler_panic_fails_task() {
        let fixture = fixture();
        fixture
            .registry
            .register(Arc::new(PanickingHandler::new("thumbnail")))
            .await;
        let task = queued(&fixture, "thumbnail").await;

        run(&fixture, task.id, CancellationToken::new()).await;

        let stored = fixture.repo.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.exception.unwrap().contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_aborted_without_execution() {
        let fixture = fixture();
        let handler = RecordingHandler::new("scan-library");
        fixture.registry.register(Arc::new(handler.clone())).await;
        let task = queued(&fixture, "scan-library").await;

        let token = CancellationToken::new();
        token.cancel();
        run(&fixture, task.id, token).await;

        let stored = fixture.repo.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Aborted);
        assert_eq!(handler.executions(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_start_write_skips_handler() {
        let fixture = fixture();
        fixture.repo.set_start_delay(Duration::from_millis(200));
        let handler = RecordingHandler::new("scan-library");
        fixture.registry.register(Arc::new(handler.clone())).await;
        let task = queued(&fixture, "scan-library").await;

        let token = CancellationToken::new();
        fixture.manager.register(task.id, token.clone());
        let manager = fixture.manager.clone();
        let task_id = task.id;
        let execution = tokio::spawn(async move { manager.execute(task_id, token, "default").await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fixture.manager.signal_cancel(task.id));
        execution.await.unwrap();

        let stored = fixture.repo.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Aborted);
        assert_eq!(handler.executions(), 0);
        assert!(!fixture.manager.is_running(task.id));
    }

    #[tokio::test]
    async fn test_cancel_running_task_aborts_it() {
        let fixture = fixture();
        let handler = BlockingHandler::new("scan-library");
        fixture.registry.register(Arc::new(handler.clone())).await;
        let task = queued(&fixture, "scan-library").await;

        let token = CancellationToken::new();
        fixture.manager.register(task.id, token.clone());
        let manager = fixture.manager.clone();
        let task_id = task.id;
        let execution = tokio::spawn(async move { manager.execute(task_id, token, "default").await });

        let observed = handler.clone();
        assert!(TestEnv::wait_for(|| {
            let handler = observed.clone();
            async move { handler.started() == 1 }
        }, Duration::from_secs(5))
        .await);

        assert!(fixture.manager.signal_cancel(task.id));
        execution.await.unwrap();

        let stored = fixture.repo.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Aborted);
        assert!(stored.exception.is_none());
        assert!(!fixture.manager.signal_cancel(task.id));
    }

    #[tokio::test]
    async fn test_task_no_longer_queued_is_skipped() {
        let fixture = fixture();
        let handler = RecordingHandler::new("scan-library");
        fixture.registry.register(Arc::new(handler.clone())).await;
        let task = queued(&fixture, "scan-library").await;
        fixture
            .repo
            .transition(&TaskTransition::abort(task.id))
            .await
            .unwrap();

        run(&fixture, task.id, CancellationToken::new()).await;
        assert_eq!(handler.executions(), 0);
        assert!(!fixture.manager.is_running(task.id));
    }
}
