//! 工作池与任务执行
//!
//! 按优先级划分的三个工作池从各自的队列领取任务，经处理器注册表找到处理器后
//! 在独立的 tokio 任务中执行，并把状态转换和进度写回任务存储。

pub mod components;
pub mod executors;
pub mod pool;
pub mod pool_manager;
pub mod registry;

pub use components::{TaskExecutionManager, TaskProgressTracker};
pub use executors::{HttpExecutor, HttpTaskParams, ShellExecutor, ShellTaskParams};
pub use pool::{WorkerPool, WorkerPoolStatus};
pub use pool_manager::{PoolManager, QueueStatus};
pub use registry::HandlerRegistry;
