pub mod database;
pub mod observability;
pub mod retrying_repository;

pub use database::{DatabaseManager, SqliteScheduledTaskRepository, SqliteTaskRepository};
pub use observability::{MetricsCollector, StructuredLogger};
pub use retrying_repository::{RetryPolicy, RetryingScheduledTaskRepository, RetryingTaskRepository};
