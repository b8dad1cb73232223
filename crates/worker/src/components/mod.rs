pub mod progress_tracker;
pub mod task_execution;

pub use progress_tracker::TaskProgressTracker;
pub use task_execution::TaskExecutionManager;
