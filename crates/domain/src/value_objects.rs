use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use scheduler_core::SchedulerError;

/// 任务负载：原样传递给处理器的键值映射
pub type TaskPayload = HashMap<String, serde_json::Value>;

pub const HIGH_PRIORITY_POOL: &str = "high-priority";
pub const DEFAULT_POOL: &str = "default";
pub const BACKGROUND_POOL: &str = "background";

/// 所有工作池名称，按优先级从高到低
pub const ALL_POOLS: [&str; 3] = [HIGH_PRIORITY_POOL, DEFAULT_POOL, BACKGROUND_POOL];

/// 任务优先级，创建后不可变，决定任务路由到哪个工作池
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum TaskPriority {
    #[serde(rename = "HIGH")]
    High,
    #[default]
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "LOW")]
    Low,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::High => "HIGH",
            TaskPriority::Normal => "NORMAL",
            TaskPriority::Low => "LOW",
        }
    }

    /// 优先级到工作池名称的固定映射
    pub fn pool_name(&self) -> &'static str {
        match self {
            TaskPriority::High => HIGH_PRIORITY_POOL,
            TaskPriority::Normal => DEFAULT_POOL,
            TaskPriority::Low => BACKGROUND_POOL,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HIGH" => Ok(TaskPriority::High),
            "NORMAL" => Ok(TaskPriority::Normal),
            "LOW" => Ok(TaskPriority::Low),
            _ => Err(SchedulerError::Serialization(format!(
                "Invalid task priority: {s}"
            ))),
        }
    }
}

/// 任务来源，仅用于审计和过滤
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum TaskTrigger {
    #[default]
    #[serde(rename = "API")]
    Api,
    #[serde(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "MANUAL")]
    Manual,
}

impl TaskTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskTrigger::Api => "API",
            TaskTrigger::Scheduled => "SCHEDULED",
            TaskTrigger::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for TaskTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskTrigger {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "API" => Ok(TaskTrigger::Api),
            "SCHEDULED" => Ok(TaskTrigger::Scheduled),
            "MANUAL" => Ok(TaskTrigger::Manual),
            _ => Err(SchedulerError::Serialization(format!(
                "Invalid task trigger: {s}"
            ))),
        }
    }
}
