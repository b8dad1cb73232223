//! 任务调度层
//!
//! 任务入队、查询与取消，周期任务物化，启动恢复，以及把它们组合在一起的调度引擎。

pub mod engine;
pub mod recovery_service;
pub mod recurring;
pub mod scheduler;

pub use engine::{EngineState, SchedulerEngine, SchedulerEngineBuilder};
pub use recovery_service::{RecoveryReport, TaskRecoveryService};
pub use recurring::{CreateScheduledTaskRequest, RecurringTaskManager};
pub use scheduler::{QueueTaskRequest, TaskScheduler};
