//! 三个优先级工作池的统一管理

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scheduler_core::{PoolsConfig, SchedulerError, SchedulerResult};
use scheduler_domain::value_objects::{
    TaskPriority, BACKGROUND_POOL, DEFAULT_POOL, HIGH_PRIORITY_POOL,
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

use crate::components::TaskExecutionManager;
use crate::pool::{WorkerPool, WorkerPoolStatus};

/// 所有工作池的即时状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pools: Vec<WorkerPoolStatus>,
}

impl QueueStatus {
    pub fn pool(&self, name: &str) -> Option<&WorkerPoolStatus> {
        self.pools.iter().find(|p| p.name == name)
    }

    pub fn total_queued(&self) -> usize {
        self.pools.iter().map(|p| p.queued_tasks).sum()
    }

    pub fn total_active(&self) -> usize {
        self.pools.iter().map(|p| p.active_tasks).sum()
    }
}

pub struct PoolManager {
    high_priority: Arc<WorkerPool>,
    default: Arc<WorkerPool>,
    background: Arc<WorkerPool>,
    execution: Arc<TaskExecutionManager>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    metrics: MetricsCollector,
}

impl PoolManager {
    pub fn new(config: &PoolsConfig, execution: Arc<TaskExecutionManager>) -> Self {
        let pool = |name: &str, max_workers: usize| {
            Arc::new(WorkerPool::new(name, max_workers, Arc::clone(&execution)))
        };

        Self {
            high_priority: pool(HIGH_PRIORITY_POOL, config.high_priority.max_workers),
            default: pool(DEFAULT_POOL, config.default.max_workers),
            background: pool(BACKGROUND_POOL, config.background.max_workers),
            execution: Arc::clone(&execution),
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            metrics: MetricsCollector::new(),
        }
    }

    fn pools(&self) -> [&Arc<WorkerPool>; 3] {
        [&self.high_priority, &self.default, &self.background]
    }

    /// 按优先级选择工作池
    pub fn pool_for(&self, priority: TaskPriority) -> &Arc<WorkerPool> {
        match priority {
            TaskPriority::High => &self.high_priority,
            TaskPriority::Normal => &self.default,
            TaskPriority::Low => &self.background,
        }
    }

    /// 放入对应优先级的队列，关闭开始后拒绝
    ///
    /// 入队后再检查一次关闭信号：检查通过的任务先于关闭被接受，
    /// 关闭时仍留在队列中，由下次启动的恢复流程重新入队。
    pub fn enqueue(&self, task_id: i64, priority: TaskPriority) -> SchedulerResult<()> {
        if self.is_shutting_down() {
            return Err(SchedulerError::EngineShutdown);
        }
        let pool = self.pool_for(priority);
        pool.enqueue(task_id);
        if self.is_shutting_down() && pool.remove_queued(task_id) {
            return Err(SchedulerError::EngineShutdown);
        }
        self.publish_gauges(pool);
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// 从对应池的队列中移除任务，任务已被领取时返回 false
    pub fn remove_queued(&self, task_id: i64, priority: TaskPriority) -> bool {
        let pool = self.pool_for(priority);
        let removed = pool.remove_queued(task_id);
        if removed {
            self.publish_gauges(pool);
        }
        removed
    }

    pub fn is_queued(&self, task_id: i64, priority: TaskPriority) -> bool {
        self.pool_for(priority).contains(task_id)
    }

    /// 向执行中的任务发出取消信号
    pub fn signal_cancel(&self, task_id: i64) -> bool {
        self.execution.signal_cancel(task_id)
    }

    pub fn queue_status(&self) -> QueueStatus {
        let pools = self
            .pools()
            .iter()
            .map(|pool| {
                let status = pool.status();
                self.metrics.update_pool_gauges(
                    &status.name,
                    status.active_workers,
                    status.queued_tasks,
                    status.active_tasks,
                );
                status
            })
            .collect();
        QueueStatus { pools }
    }

    pub async fn is_started(&self) -> bool {
        !self.handles.lock().await.is_empty()
    }

    /// 启动所有工作池，重复调用无副作用
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() || self.shutdown.is_cancelled() {
            return;
        }

        for pool in self.pools() {
            handles.extend(pool.spawn_workers(&self.shutdown));
            StructuredLogger::log_pool_started(pool.name(), pool.max_workers());
        }
        info!("工作池已启动，共 {} 个工作者", handles.len());
    }

    /// 取消所有工作者和执行中的处理器，并在超时内等待工作者退出
    ///
    /// 返回 false 表示超时仍有工作者未退出。
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!("工作者异常退出: {}", e);
                    }
                }
                info!("所有工作池已停止");
                true
            }
            Err(_) => {
                warn!("等待工作者退出超时 ({:?})", timeout);
                false
            }
        }
    }

    fn publish_gauges(&self, pool: &WorkerPool) {
        let status = pool.status();
        self.metrics.update_pool_gauges(
            &status.name,
            status.active_workers,
            status.queued_tasks,
            status.active_tasks,
        );
    }
}
