use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{TaskPayload, TaskPriority};
use scheduler_core::{SchedulerError, SchedulerResult};

/// 周期任务模板
///
/// 启用期间始终满足 `next_run = last_run + interval`。`last_run` 在创建时
/// 初始化为创建时刻，因此该约束从创建起即成立。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub name: String,
    pub command_name: String,
    pub payload: TaskPayload,
    pub interval_seconds: i64,
    pub priority: TaskPriority,
    pub enabled: bool,
    pub last_run: DateTime<Utc>,
    pub next_run: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 周期任务的稀疏更新，`None` 字段保持不变
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduledTaskUpdate {
    pub name: Option<String>,
    pub command_name: Option<String>,
    pub payload: Option<TaskPayload>,
    pub interval_seconds: Option<i64>,
    pub priority: Option<TaskPriority>,
    pub enabled: Option<bool>,
}

impl ScheduledTaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.command_name.is_none()
            && self.payload.is_none()
            && self.interval_seconds.is_none()
            && self.priority.is_none()
            && self.enabled.is_none()
    }
}

/// 周期任务间隔上限：100年
pub const MAX_INTERVAL_SECONDS: i64 = 100 * 366 * 24 * 60 * 60;

fn validate_interval(interval_seconds: i64) -> SchedulerResult<()> {
    if interval_seconds < 1 {
        return Err(SchedulerError::InvalidTaskParams(format!(
            "周期任务间隔必须至少为1秒: {interval_seconds}"
        )));
    }
    if interval_seconds > MAX_INTERVAL_SECONDS {
        return Err(SchedulerError::InvalidTaskParams(format!(
            "周期任务间隔不能超过 {MAX_INTERVAL_SECONDS} 秒: {interval_seconds}"
        )));
    }
    Ok(())
}

fn next_run_after(at: DateTime<Utc>, interval_seconds: i64) -> SchedulerResult<DateTime<Utc>> {
    chrono::Duration::try_seconds(interval_seconds)
        .and_then(|interval| at.checked_add_signed(interval))
        .ok_or_else(|| {
            SchedulerError::InvalidTaskParams(format!(
                "周期任务下次执行时间超出范围: {at} + {interval_seconds} 秒"
            ))
        })
}

impl ScheduledTask {
    pub fn new(
        name: String,
        command_name: String,
        payload: TaskPayload,
        interval: Duration,
        priority: TaskPriority,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Self> {
        let interval_seconds = i64::try_from(interval.as_secs()).map_err(|_| {
            SchedulerError::InvalidTaskParams(format!("周期任务间隔过大: {interval:?}"))
        })?;
        validate_interval(interval_seconds)?;
        let next_run = next_run_after(now, interval_seconds)?;

        if command_name.is_empty() {
            return Err(SchedulerError::InvalidTaskParams(
                "周期任务的命令名不能为空".to_string(),
            ));
        }

        Ok(Self {
            id: 0, // 将由存储生成
            name,
            command_name,
            payload,
            interval_seconds,
            priority,
            enabled: true,
            last_run: now,
            next_run,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.interval_seconds).unwrap_or(chrono::Duration::MAX)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run <= now
    }

    /// 记录一次物化：`last_run = now`，`next_run = now + interval`
    pub fn mark_materialized(&mut self, now: DateTime<Utc>) -> SchedulerResult<()> {
        self.next_run = next_run_after(now, self.interval_seconds)?;
        self.last_run = now;
        self.updated_at = now;
        Ok(())
    }

    /// 应用稀疏更新；修改间隔时按 `last_run + 新间隔` 重新计算 `next_run`
    pub fn apply_update(
        &mut self,
        update: &ScheduledTaskUpdate,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let next_run = match update.interval_seconds {
            Some(interval_seconds) => {
                validate_interval(interval_seconds)?;
                Some(next_run_after(self.last_run, interval_seconds)?)
            }
            None => None,
        };
        if let Some(command_name) = &update.command_name {
            if command_name.is_empty() {
                return Err(SchedulerError::InvalidTaskParams(
                    "周期任务的命令名不能为空".to_string(),
                ));
            }
        }

        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(command_name) = &update.command_name {
            self.command_name = command_name.clone();
        }
        if let Some(payload) = &update.payload {
            self.payload = payload.clone();
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let (Some(interval_seconds), Some(next_run)) = (update.interval_seconds, next_run) {
            self.interval_seconds = interval_seconds;
            self.next_run = next_run;
        }

        self.updated_at = now;
        Ok(())
    }
}
