//! Test data builders for creating test entities

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scheduler_domain::entities::{Task, TaskStatus};
use scheduler_domain::scheduled_task::ScheduledTask;
use scheduler_domain::value_objects::{TaskPayload, TaskPriority, TaskTrigger};

/// Builder for creating test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task::new(
                "test_task".to_string(),
                "noop".to_string(),
                HashMap::new(),
                TaskPriority::Normal,
                TaskTrigger::Api,
            ),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_command(mut self, command_name: &str) -> Self {
        self.task.command_name = command_name.to_string();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_payload_value(mut self, key: &str, value: serde_json::Value) -> Self {
        self.task.payload.insert(key.to_string(), value);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        if status != TaskStatus::Queued {
            self.task.started_at = Some(self.task.queued_at);
        }
        self
    }

    pub fn with_queued_at(mut self, queued_at: DateTime<Utc>) -> Self {
        self.task.queued_at = queued_at;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test ScheduledTask entities
pub struct ScheduledTaskBuilder {
    name: String,
    command_name: String,
    payload: TaskPayload,
    interval: Duration,
    priority: TaskPriority,
    created_at: DateTime<Utc>,
}

impl ScheduledTaskBuilder {
    pub fn new() -> Self {
        Self {
            name: "test_scheduled_task".to_string(),
            command_name: "noop".to_string(),
            payload: HashMap::new(),
            interval: Duration::from_secs(60),
            priority: TaskPriority::Normal,
            created_at: Utc::now(),
        }
    }

    pub fn with_command(mut self, command_name: &str) -> Self {
        self.command_name = command_name.to_string();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn build(self) -> ScheduledTask {
        ScheduledTask::new(
            self.name,
            self.command_name,
            self.payload,
            self.interval,
            self.priority,
            self.created_at,
        )
        .expect("builder produces a valid scheduled task")
    }
}

impl Default for ScheduledTaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}
