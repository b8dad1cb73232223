use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{TaskPayload, TaskPriority, TaskTrigger};
use scheduler_core::{SchedulerError, SchedulerResult};

/// 任务状态
///
/// 状态机：
///
/// ```text
/// Queued ──► Running ──► Completed | Failed
///   │           │
///   │           └──► Cancelling ──► Aborted
///   ├──► Aborted（开始前被取消）
///   └──► Failed（没有注册处理器）
/// ```
///
/// 终态之后不允许任何转换，Running 只能从 Queued 进入，因此任务最多执行一次。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLING")]
    Cancelling,
    #[serde(rename = "ABORTED")]
    Aborted,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelling,
        TaskStatus::Aborted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelling => "CANCELLING",
            TaskStatus::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Aborted
        )
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Aborted)
                | (Queued, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelling)
                | (Running, Aborted)
                | (Cancelling, Aborted)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(TaskStatus::Queued),
            "RUNNING" => Ok(TaskStatus::Running),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELLING" => Ok(TaskStatus::Cancelling),
            "ABORTED" => Ok(TaskStatus::Aborted),
            _ => Err(SchedulerError::Serialization(format!(
                "Invalid task status: {s}"
            ))),
        }
    }
}

/// 任务进度：完成百分比和按顺序追加的状态消息
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskProgress {
    pub percent: i32,
    pub status_messages: Vec<String>,
}

impl TaskProgress {
    /// 记录一次进度回调，百分比被限制在 0..=100
    pub fn record(&mut self, percent: i32, message: impl Into<String>) {
        self.percent = percent.clamp(0, 100);
        self.status_messages.push(message.into());
    }
}

/// 一个异步执行单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    /// 处理器注册表中的命令名
    pub command_name: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub trigger: TaskTrigger,
    pub payload: TaskPayload,
    pub progress: TaskProgress,
    /// 由周期任务物化而来时指向来源定义
    pub scheduled_task_id: Option<i64>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// 仅在 Failed 时填充
    pub exception: Option<String>,
}

impl Task {
    pub fn new(
        name: String,
        command_name: String,
        payload: TaskPayload,
        priority: TaskPriority,
        trigger: TaskTrigger,
    ) -> Self {
        Self {
            id: 0, // 将由存储生成
            name,
            command_name,
            status: TaskStatus::Queued,
            priority,
            trigger,
            payload,
            progress: TaskProgress::default(),
            scheduled_task_id: None,
            queued_at: Utc::now(),
            started_at: None,
            ended_at: None,
            exception: None,
        }
    }

    pub fn with_scheduled_task(mut self, scheduled_task_id: i64) -> Self {
        self.scheduled_task_id = Some(scheduled_task_id);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 在内存快照上应用一次状态转换
    ///
    /// 当前状态不在 `transition.from` 中时返回 `Ok(false)` 且不做修改，
    /// 与存储层的比较并交换语义一致。
    pub fn apply_transition(&mut self, transition: &TaskTransition) -> SchedulerResult<bool> {
        if !transition.from.contains(&self.status) {
            return Ok(false);
        }

        if !self.status.can_transition_to(transition.to) {
            return Err(SchedulerError::InvalidTransition {
                id: self.id,
                from: self.status.to_string(),
                to: transition.to.to_string(),
            });
        }

        self.status = transition.to;
        if transition.to == TaskStatus::Running {
            self.started_at = Some(transition.at);
        }
        if transition.to.is_terminal() {
            self.ended_at = Some(transition.at);
        }
        if let Some(exception) = &transition.exception {
            self.exception = Some(exception.clone());
        }

        Ok(true)
    }
}

/// 一次带前置状态条件的状态转换
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTransition {
    pub task_id: i64,
    /// 允许的当前状态，当前状态不在其中时转换不生效
    pub from: Vec<TaskStatus>,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
    pub exception: Option<String>,
}

impl TaskTransition {
    pub fn new(task_id: i64, from: &[TaskStatus], to: TaskStatus) -> Self {
        Self {
            task_id,
            from: from.to_vec(),
            to,
            at: Utc::now(),
            exception: None,
        }
    }

    /// Queued → Running
    pub fn start(task_id: i64) -> Self {
        Self::new(task_id, &[TaskStatus::Queued], TaskStatus::Running)
    }

    /// Running → Completed
    pub fn complete(task_id: i64) -> Self {
        Self::new(task_id, &[TaskStatus::Running], TaskStatus::Completed)
    }

    /// Queued | Running → Failed
    pub fn fail(task_id: i64, exception: impl Into<String>) -> Self {
        let mut transition = Self::new(
            task_id,
            &[TaskStatus::Queued, TaskStatus::Running],
            TaskStatus::Failed,
        );
        transition.exception = Some(exception.into());
        transition
    }

    /// Running → Cancelling
    pub fn cancelling(task_id: i64) -> Self {
        Self::new(task_id, &[TaskStatus::Running], TaskStatus::Cancelling)
    }

    /// Queued | Running | Cancelling → Aborted
    pub fn abort(task_id: i64) -> Self {
        Self::new(
            task_id,
            &[TaskStatus::Queued, TaskStatus::Running, TaskStatus::Cancelling],
            TaskStatus::Aborted,
        )
    }

    pub fn from_states(mut self, from: &[TaskStatus]) -> Self {
        self.from = from.to_vec();
        self
    }

    /// 每个前置状态都必须能合法转换到目标状态
    pub fn validate(&self) -> SchedulerResult<()> {
        match self.from.iter().find(|from| !from.can_transition_to(self.to)) {
            Some(from) => Err(SchedulerError::InvalidTransition {
                id: self.task_id,
                from: from.to_string(),
                to: self.to.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// 任务过滤器，空条件匹配所有任务
#[derive(Debug, Clone)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub command_name: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            status: None,
            command_name: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |status| task.status == status)
            && self
                .command_name
                .as_deref()
                .map_or(true, |command| task.command_name == command)
    }
}

/// 分页查询结果，`total` 不受分页参数影响
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn queued_task() -> Task {
        let mut task = Task::new(
            "刷新元数据".to_string(),
            "refresh-metadata".to_string(),
            HashMap::new(),
            TaskPriority::Normal,
            TaskTrigger::Api,
        );
        task.id = 1;
        task
    }

    #[test]
    fn test_new_task_is_queued() {
        let task = queued_task();
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.started_at.is_none());
        assert!(task.ended_at.is_none());
        assert!(task.exception.is_none());
        assert_eq!(task.progress, TaskProgress::default());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Aborted] {
            assert!(terminal.is_terminal());
            for next in TaskStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_running_only_from_queued() {
        for status in TaskStatus::ALL {
            assert_eq!(
                status.can_transition_to(TaskStatus::Running),
                status == TaskStatus::Queued
            );
        }
    }

    #[test]
    fn test_cancelling_only_reaches_aborted() {
        for next in TaskStatus::ALL {
            assert_eq!(
                TaskStatus::Cancelling.can_transition_to(next),
                next == TaskStatus::Aborted
            );
        }
    }

    #[test]
    fn test_apply_start_then_complete_sets_timestamps() {
        let mut task = queued_task();

        assert!(task.apply_transition(&TaskTransition::start(1)).unwrap());
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.started_at.is_some());
        assert!(task.ended_at.is_none());

        assert!(task.apply_transition(&TaskTransition::complete(1)).unwrap());
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.ended_at.is_some());
    }

    #[test]
    fn test_apply_transition_with_unmatched_precondition_is_noop() {
        let mut task = queued_task();
        task.apply_transition(&TaskTransition::start(1)).unwrap();
        task.apply_transition(&TaskTransition::complete(1)).unwrap();

        let applied = task.apply_transition(&TaskTransition::cancelling(1)).unwrap();
        assert!(!applied);
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_apply_illegal_transition_errors() {
        let mut task = queued_task();
        let transition =
            TaskTransition::new(1, &[TaskStatus::Queued], TaskStatus::Completed);
        assert!(matches!(
            task.apply_transition(&transition),
            Err(SchedulerError::InvalidTransition { .. })
        ));
        assert_eq!(task.status, TaskStatus::Queued);
    }

    #[test]
    fn test_fail_records_exception() {
        let mut task = queued_task();
        task.apply_transition(&TaskTransition::fail(1, "no handler registered for command: x"))
            .unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.exception.as_deref(),
            Some("no handler registered for command: x")
        );
        assert!(task.ended_at.is_some());
    }

    #[test]
    fn test_progress_record_clamps_and_appends() {
        let mut progress = TaskProgress::default();
        progress.record(40, "扫描目录");
        progress.record(150, "写入数据库");
        assert_eq!(progress.percent, 100);
        assert_eq!(progress.status_messages, vec!["扫描目录", "写入数据库"]);
        progress.record(-5, "回退");
        assert_eq!(progress.percent, 0);
    }

    #[test]
    fn test_filter_matching() {
        let task = queued_task();
        assert!(TaskFilter::default().matches(&task));

        let by_status = TaskFilter {
            status: Some(TaskStatus::Running),
            ..Default::default()
        };
        assert!(!by_status.matches(&task));

        let by_command = TaskFilter {
            command_name: Some("refresh-metadata".to_string()),
            ..Default::default()
        };
        assert!(by_command.matches(&task));
    }

    #[test]
    fn test_status_string_conversion() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("PAUSED".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_validate_rejects_edges_out_of_terminal_states() {
        assert!(TaskTransition::abort(1).validate().is_ok());
        assert!(TaskTransition::fail(1, "boom").validate().is_ok());

        let revert = TaskTransition::new(1, &[TaskStatus::Completed], TaskStatus::Running);
        assert!(matches!(
            revert.validate(),
            Err(SchedulerError::InvalidTransition { .. })
        ));
    }
}
