//! 调度引擎配置
//!
//! 配置加载顺序：
//! 1. 各配置段的默认值
//! 2. TOML 配置文件
//! 3. 环境变量覆盖（前缀 `SCHEDULER_`，层级分隔符 `__`，如 `SCHEDULER_POOLS__DEFAULT__MAX_WORKERS=8`）

pub mod models;

pub use models::*;
