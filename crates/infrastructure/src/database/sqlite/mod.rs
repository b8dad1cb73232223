pub mod migrations;
pub mod sqlite_scheduled_task_repository;
pub mod sqlite_task_repository;

pub use sqlite_scheduled_task_repository::SqliteScheduledTaskRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
