use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use scheduler_core::SchedulerResult;
use scheduler_domain::entities::TaskProgress;
use scheduler_domain::ports::handler::ProgressReporter;
use scheduler_domain::repositories::TaskRepository;

struct TrackerState {
    progress: TaskProgress,
    /// 最近一次写入失败，内存中的进度比存储新
    dirty: bool,
    /// 任务已结束，之后的回调被忽略
    closed: bool,
}

/// 单个任务的进度回调
///
/// 每次回调按顺序写入存储。写入失败时只记录日志，等到任务结束时由
/// [`TaskProgressTracker::flush`] 补写。[`TaskProgressTracker::close`] 之后到达的回调
/// （例如处理器派生的任务在处理器返回后仍在汇报）不再写入。
pub struct TaskProgressTracker {
    task_id: i64,
    task_repo: Arc<dyn TaskRepository>,
    state: Mutex<TrackerState>,
}

impl TaskProgressTracker {
    pub fn new(task_id: i64, initial: TaskProgress, task_repo: Arc<dyn TaskRepository>) -> Self {
        Self {
            task_id,
            task_repo,
            state: Mutex::new(TrackerState {
                progress: initial,
                dirty: false,
                closed: false,
            }),
        }
    }

    pub async fn snapshot(&self) -> TaskProgress {
        self.state.lock().await.progress.clone()
    }

    /// 补写尚未持久化的进度
    pub async fn flush(&self) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return Ok(());
        }
        self.task_repo
            .update_progress(self.task_id, &state.progress)
            .await?;
        state.dirty = false;
        Ok(())
    }

    /// 停止接受回调并补写尚未持久化的进度
    pub async fn close(&self) -> SchedulerResult<()> {
        self.state.lock().await.closed = true;
        self.flush().await
    }
}

#[async_trait]
impl ProgressReporter for TaskProgressTracker {
    async fn report(&self, percent: i32, message: &str) {
        let mut state = self.state.lock().await;
        if state.closed {
            debug!("任务 {} 已结束，忽略进度: {}% {}", self.task_id, percent, message);
            return;
        }
        state.progress.record(percent, message);

        match self
            .task_repo
            .update_progress(self.task_id, &state.progress)
            .await
        {
            Ok(()) => state.dirty = false,
            Err(e) => {
                state.dirty = true;
                warn!("任务 {} 的进度写入失败: {}", self.task_id, e);
            }
        }
    }
}
