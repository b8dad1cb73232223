//! Metrics collector for the scheduler engine
//!
//! 指标名统一以 `scheduler_` 为前缀，带 `pool`、`command`、`status` 等标签。

use metrics::{counter, gauge, histogram};

/// Metrics collector for the scheduler engine
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn record_task_queued(&self, pool: &str, trigger: &str) {
        counter!(
            "scheduler_tasks_queued_total",
            "pool" => pool.to_string(),
            "trigger" => trigger.to_string()
        )
        .increment(1);
    }

    /// Record a task reaching a terminal state
    pub fn record_task_finished(&self, command_name: &str, status: &str, duration_seconds: f64) {
        counter!(
            "scheduler_tasks_finished_total",
            "command" => command_name.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!(
            "scheduler_task_duration_seconds",
            "command" => command_name.to_string()
        )
        .record(duration_seconds);
    }

    pub fn record_cancel_request(&self, outcome: &str) {
        counter!(
            "scheduler_cancel_requests_total",
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }

    pub fn record_store_retry(&self, operation: &str) {
        counter!(
            "scheduler_task_store_retries_total",
            "operation" => operation.to_string()
        )
        .increment(1);
    }

    pub fn record_task_store_fault(&self, operation: &str) {
        counter!(
            "scheduler_task_store_faults_total",
            "operation" => operation.to_string()
        )
        .increment(1);
    }

    pub fn record_materialization(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        counter!(
            "scheduler_recurring_materializations_total",
            "outcome" => outcome
        )
        .increment(1);
    }

    pub fn record_recovery(&self, aborted: usize, requeued: usize) {
        counter!("scheduler_recovery_aborted_total").increment(aborted as u64);
        counter!("scheduler_recovery_requeued_total").increment(requeued as u64);
    }

    /// Update pool gauges
    pub fn update_pool_gauges(
        &self,
        pool: &str,
        active_workers: usize,
        queued_tasks: usize,
        active_tasks: usize,
    ) {
        gauge!("scheduler_pool_active_workers", "pool" => pool.to_string())
            .set(active_workers as f64);
        gauge!("scheduler_pool_queued_tasks", "pool" => pool.to_string())
            .set(queued_tasks as f64);
        gauge!("scheduler_pool_active_tasks", "pool" => pool.to_string())
            .set(active_tasks as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_noop() {
        let metrics = MetricsCollector::new();
        metrics.record_task_queued("default", "API");
        metrics.record_task_finished("refresh-metadata", "COMPLETED", 0.25);
        metrics.record_materialization(false);
        metrics.update_pool_gauges("background", 1, 3, 1);
    }
}
