//! Test helper utilities

use std::time::Duration;

use scheduler_domain::entities::{Task, TaskStatus};
use scheduler_domain::repositories::TaskRepository;
use tokio::time::sleep;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// 轮询直到条件成立或超时
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(POLL_INTERVAL).await;
        }

        condition().await
    }

    /// 等待任务进入指定状态，超时返回 None
    pub async fn wait_for_status(
        repo: &dyn TaskRepository,
        task_id: i64,
        status: TaskStatus,
        timeout: Duration,
    ) -> Option<Task> {
        Self::wait_until(repo, task_id, timeout, |task| task.status == status).await
    }

    /// 等待任务进入任意终态
    pub async fn wait_for_terminal(
        repo: &dyn TaskRepository,
        task_id: i64,
        timeout: Duration,
    ) -> Option<Task> {
        Self::wait_until(repo, task_id, timeout, Task::is_terminal).await
    }

    async fn wait_until(
        repo: &dyn TaskRepository,
        task_id: i64,
        timeout: Duration,
        predicate: impl Fn(&Task) -> bool,
    ) -> Option<Task> {
        let start = std::time::Instant::now();
        loop {
            if let Ok(Some(task)) = repo.get_by_id(task_id).await {
                if predicate(&task) {
                    return Some(task);
                }
            }
            if start.elapsed() >= timeout {
                return None;
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}
