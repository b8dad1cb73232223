//! 单个优先级工作池

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::components::TaskExecutionManager;

/// 工作池的即时状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolStatus {
    pub name: String,
    pub max_workers: usize,
    /// 存活的工作者循环数
    pub active_workers: usize,
    pub queued_tasks: usize,
    /// 正在执行处理器的任务数
    pub active_tasks: usize,
}

/// 固定数量的工作者循环共享一个 FIFO 队列
pub struct WorkerPool {
    name: String,
    max_workers: usize,
    queue: Mutex<VecDeque<i64>>,
    notify: Notify,
    active_workers: AtomicUsize,
    active_tasks: AtomicUsize,
    execution: Arc<TaskExecutionManager>,
}

impl WorkerPool {
    pub fn new(name: &str, max_workers: usize, execution: Arc<TaskExecutionManager>) -> Self {
        Self {
            name: name.to_string(),
            max_workers,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            active_workers: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            execution,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<i64>> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 入队并唤醒一个空闲工作者，不会阻塞
    pub fn enqueue(&self, task_id: i64) {
        self.queue().push_back(task_id);
        self.notify.notify_one();
    }

    /// 从队列中移除尚未被领取的任务
    pub fn remove_queued(&self, task_id: i64) -> bool {
        let mut queue = self.queue();
        match queue.iter().position(|id| *id == task_id) {
            Some(index) => {
                queue.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, task_id: i64) -> bool {
        self.queue().contains(&task_id)
    }

    pub fn queued_tasks(&self) -> usize {
        self.queue().len()
    }

    pub fn status(&self) -> WorkerPoolStatus {
        WorkerPoolStatus {
            name: self.name.clone(),
            max_workers: self.max_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst),
            queued_tasks: self.queued_tasks(),
            active_tasks: self.active_tasks.load(Ordering::SeqCst),
        }
    }

    /// 启动 `max_workers` 个工作者循环，`shutdown` 取消后循环退出
    pub fn spawn_workers(self: &Arc<Self>, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.max_workers)
            .map(|index| {
                let pool = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run_worker(index, shutdown).await })
            })
            .collect()
    }

    async fn run_worker(self: Arc<Self>, index: usize, shutdown: CancellationToken) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        debug!("工作池 {} 的工作者 {} 已启动", self.name, index);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if let Some((task_id, token)) = self.next_task(&shutdown) {
                self.active_tasks.fetch_add(1, Ordering::SeqCst);
                self.execution.execute(task_id, token, &self.name).await;
                self.active_tasks.fetch_sub(1, Ordering::SeqCst);
                continue;
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = shutdown.cancelled() => break,
            }
        }

        self.active_workers.fetch_sub(1, Ordering::SeqCst);
        debug!("工作池 {} 的工作者 {} 已退出", self.name, index);
    }

    /// 出队并登记执行令牌，两步在同一把队列锁内完成
    fn next_task(&self, shutdown: &CancellationToken) -> Option<(i64, CancellationToken)> {
        let mut queue = self.queue();
        if shutdown.is_cancelled() {
            return None;
        }
        let task_id = queue.pop_front()?;
        let token = shutdown.child_token();
        self.execution.register(task_id, token.clone());
        Some((task_id, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HandlerRegistry;
    use scheduler_testing_utils::MockTaskRepository;

    fn pool(max_workers: usize) -> WorkerPool {
        let execution = Arc::new(TaskExecutionManager::new(
            Arc::new(MockTaskRepository::new()),
            Arc::new(HandlerRegistry::new()),
        ));
        WorkerPool::new("default", max_workers, execution)
    }

    #[test]
    fn test_queue_is_fifo_and_removable() {
        let pool = pool(2);
        pool.enqueue(1);
        pool.enqueue(2);
        pool.enqueue(3);
        assert_eq!(pool.queued_tasks(), 3);

        assert!(pool.remove_queued(2));
        assert!(!pool.remove_queued(2));

        let shutdown = CancellationToken::new();
        assert_eq!(pool.next_task(&shutdown).map(|(id, _)| id), Some(1));
        assert_eq!(pool.next_task(&shutdown).map(|(id, _)| id), Some(3));
        assert!(pool.next_task(&shutdown).is_none());
    }

    #[test]
    fn test_dequeue_registers_cancellation_token() {
        let pool = pool(1);
        pool.enqueue(9);
        let shutdown = CancellationToken::new();
        let (_, token) = pool.next_task(&shutdown).unwrap();

        assert!(pool.execution.signal_cancel(9));
        assert!(token.is_cancelled());
        assert!(!shutdown.is_cancelled());
    }

    #[test]
    fn test_status_before_start() {
        let pool = pool(3);
        pool.enqueue(1);
        let status = pool.status();
        assert_eq!(status.name, "default");
        assert_eq!(status.max_workers, 3);
        assert_eq!(status.active_workers, 0);
        assert_eq!(status.queued_tasks, 1);
        assert_eq!(status.active_tasks, 0);
    }

    #[tokio::test]
    async fn test_workers_exit_on_shutdown() {
        let pool = Arc::new(pool(2));
        let shutdown = CancellationToken::new();
        let handles = pool.spawn_workers(&shutdown);
        assert_eq!(handles.len(), 2);

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(pool.status().active_workers, 0);
    }
}
