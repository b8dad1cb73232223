//! Mock implementations for the repository traits
//!
//! 内存实现与 SQLite 实现遵循相同的比较并交换语义，
//! `set_fail_writes(true)` 之后所有写操作返回可重试的存储错误。
//! `set_start_delay` 让 Queued → Running 的写入变慢，
//! `fail_after_commit` 让接下来若干次写入生效后仍报告存储错误。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::entities::{Task, TaskFilter, TaskPage, TaskProgress, TaskStatus, TaskTransition};
use scheduler_domain::repositories::{ScheduledTaskRepository, TaskRepository};
use scheduler_domain::scheduled_task::ScheduledTask;

fn injected_fault(operation: &str) -> SchedulerError {
    SchedulerError::DatabaseOperation(format!("injected store fault: {operation}"))
}

/// Mock implementation of TaskRepository for testing
#[derive(Debug, Clone)]
pub struct MockTaskRepository {
    tasks: Arc<Mutex<HashMap<i64, Task>>>,
    next_id: Arc<Mutex<i64>>,
    fail_writes: Arc<AtomicBool>,
    start_delay: Arc<Mutex<Duration>>,
    fail_after_commit: Arc<AtomicUsize>,
}

impl MockTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            fail_writes: Arc::new(AtomicBool::new(false)),
            start_delay: Arc::new(Mutex::new(Duration::ZERO)),
            fail_after_commit: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 预置任务，保留其 ID 和状态
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.tasks.lock().unwrap();
            let mut next_id = repo.next_id.lock().unwrap();
            for task in tasks {
                *next_id = (*next_id).max(task.id + 1);
                map.insert(task.id, task);
            }
        }
        repo
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 之后每次 Queued → Running 的转换在生效前等待 `delay`
    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock().unwrap() = delay;
    }

    /// 接下来 `times` 次 create/transition 写入生效，但返回存储错误
    pub fn fail_after_commit(&self, times: usize) {
        self.fail_after_commit.store(times, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    fn take_commit_fault(&self, operation: &str) -> SchedulerResult<()> {
        let pending = self
            .fail_after_commit
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match pending {
            Ok(_) => Err(injected_fault(operation)),
            Err(_) => Ok(()),
        }
    }

    pub fn get_all_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    fn check_writable(&self, operation: &str) -> SchedulerResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected_fault(operation));
        }
        Ok(())
    }
}

impl Default for MockTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        self.check_writable("create")?;
        let mut tasks = self.tasks.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut new_task = task.clone();
        new_task.id = *next_id;
        *next_id += 1;
        tasks.insert(new_task.id, new_task.clone());
        drop(next_id);
        drop(tasks);
        self.take_commit_fault("create")?;
        Ok(new_task)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn update_progress(&self, id: i64, progress: &TaskProgress) -> SchedulerResult<()> {
        self.check_writable("update_progress")?;
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound { id })?;
        task.progress = progress.clone();
        Ok(())
    }

    async fn transition(&self, transition: &TaskTransition) -> SchedulerResult<bool> {
        self.check_writable("transition")?;
        transition.validate()?;
        if transition.to == TaskStatus::Running {
            let delay = *self.start_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        let applied = {
            let mut tasks = self.tasks.lock().unwrap();
            match tasks.get_mut(&transition.task_id) {
                Some(task) => task.apply_transition(transition)?,
                None => false,
            }
        };
        if applied {
            self.take_commit_fault("transition")?;
        }
        Ok(applied)
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<TaskPage> {
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<Task> = tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        matched.sort_by(|a, b| b.queued_at.cmp(&a.queued_at).then(b.id.cmp(&a.id)));

        let total = matched.len() as i64;
        let tasks = matched
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();
        Ok(TaskPage { tasks, total })
    }

    async fn find_by_statuses(&self, statuses: &[TaskStatus]) -> SchedulerResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|t| statuses.contains(&t.status))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then(a.id.cmp(&b.id)));
        Ok(matched)
    }
}

/// Mock implementation of ScheduledTaskRepository for testing
#[derive(Debug, Clone)]
pub struct MockScheduledTaskRepository {
    tasks: Arc<Mutex<HashMap<i64, ScheduledTask>>>,
    next_id: Arc<Mutex<i64>>,
    fail_writes: Arc<AtomicBool>,
}

impl MockScheduledTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    fn check_writable(&self, operation: &str) -> SchedulerResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected_fault(operation));
        }
        Ok(())
    }
}

impl Default for MockScheduledTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScheduledTaskRepository for MockScheduledTaskRepository {
    async fn create(&self, task: &ScheduledTask) -> SchedulerResult<ScheduledTask> {
        self.check_writable("create")?;
        let mut tasks = self.tasks.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut new_task = task.clone();
        new_task.id = *next_id;
        *next_id += 1;
        tasks.insert(new_task.id, new_task.clone());
        Ok(new_task)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<ScheduledTask>> {
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn list_all(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        let mut tasks: Vec<ScheduledTask> = self.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn find_due(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<ScheduledTask>> {
        let mut due: Vec<ScheduledTask> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_run.cmp(&b.next_run).then(a.id.cmp(&b.id)));
        Ok(due)
    }

    async fn update(&self, task: &ScheduledTask) -> SchedulerResult<()> {
        self.check_writable("update")?;
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(SchedulerError::ScheduledTaskNotFound { id: task.id }),
        }
    }

    async fn delete(&self, id: i64) -> SchedulerResult<bool> {
        self.check_writable("delete")?;
        Ok(self.tasks.lock().unwrap().remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::TaskBuilder;

    #[tokio::test]
    async fn test_transition_follows_compare_and_swap() {
        let repo = MockTaskRepository::new();
        let task = repo.create(&TaskBuilder::new().build()).await.unwrap();

        assert!(repo.transition(&TaskTransition::start(task.id)).await.unwrap());
        assert!(!repo.transition(&TaskTransition::start(task.id)).await.unwrap());
        assert!(!repo.transition(&TaskTransition::start(999)).await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_fault_is_retryable() {
        let repo = MockTaskRepository::new();
        let task = repo.create(&TaskBuilder::new().build()).await.unwrap();
        repo.set_fail_writes(true);

        let err = repo
            .update_progress(task.id, &TaskProgress::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(repo.get_by_id(task.id).await.unwrap().is_some());
    }
}
