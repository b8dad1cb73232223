use serde::{Deserialize, Serialize};

/// 单个工作池配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_workers: usize,
}

/// 三个优先级工作池的配置，池名固定为 "high-priority"、"default"、"background"
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolsConfig {
    pub high_priority: PoolSettings,
    pub default: PoolSettings,
    pub background: PoolSettings,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            high_priority: PoolSettings { max_workers: 2 },
            default: PoolSettings { max_workers: 4 },
            background: PoolSettings { max_workers: 1 },
        }
    }
}

impl PoolsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, settings) in [
            ("high-priority", &self.high_priority),
            ("default", &self.default),
            ("background", &self.background),
        ] {
            if settings.max_workers == 0 {
                return Err(anyhow::anyhow!("工作池 {name} 的最大工作者数必须大于0"));
            }
        }
        Ok(())
    }
}

/// 周期任务管理器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecurringConfig {
    pub enabled: bool,
    pub tick_interval_seconds: u64,
}

impl Default for RecurringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_seconds: 60,
        }
    }
}

impl RecurringConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_seconds == 0 {
            return Err(anyhow::anyhow!("周期任务扫描间隔必须大于0"));
        }
        Ok(())
    }
}

/// 启动恢复策略
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// 为 true 时重新入队仍处于 Queued 的任务，否则将其标记为 Aborted
    pub requeue_queued: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            requeue_queued: true,
        }
    }
}

/// 存储写入失败时的重试策略
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_interval_ms: 200,
        }
    }
}

impl PersistenceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("存储重试次数必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub timeout_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
        }
    }
}
