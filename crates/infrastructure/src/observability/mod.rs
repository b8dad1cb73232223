//! 可观测性
//!
//! 结构化日志事件和 Prometheus 指标。日志订阅器的初始化在 `scheduler_core::logging`，
//! 指标导出器由二进制入口安装；未安装导出器时记录指标是空操作。

pub mod metrics_collector;
pub mod structured_logger;

pub use metrics_collector::MetricsCollector;
pub use structured_logger::StructuredLogger;
