//! Structured logging utilities
//!
//! 每个函数对应引擎中的一类事件，字段名保持稳定以便日志检索。

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log task enqueue event
    pub fn log_task_queued(
        task_id: i64,
        task_name: &str,
        command_name: &str,
        priority: &str,
        trigger: &str,
    ) {
        info!(
            event = "task_queued",
            task.id = task_id,
            task.name = task_name,
            task.command = command_name,
            task.priority = priority,
            task.trigger = trigger,
            "任务已入队"
        );
    }

    /// Log task execution start
    pub fn log_task_started(task_id: i64, command_name: &str, pool: &str) {
        info!(
            event = "task_started",
            task.id = task_id,
            task.command = command_name,
            pool.name = pool,
            "任务开始执行"
        );
    }

    /// Log task execution reaching a terminal state
    pub fn log_task_finished(
        task_id: i64,
        command_name: &str,
        status: &str,
        duration_ms: u64,
        exception: Option<&str>,
    ) {
        match exception {
            None => info!(
                event = "task_finished",
                task.id = task_id,
                task.command = command_name,
                task.status = status,
                task.duration_ms = duration_ms,
                "任务执行结束"
            ),
            Some(exception) => error!(
                event = "task_failed",
                task.id = task_id,
                task.command = command_name,
                task.status = status,
                task.duration_ms = duration_ms,
                task.error = exception,
                "任务执行失败"
            ),
        }
    }

    pub fn log_task_cancel_requested(task_id: i64, current_status: &str) {
        info!(
            event = "task_cancel_requested",
            task.id = task_id,
            task.status = current_status,
            "收到任务取消请求"
        );
    }

    pub fn log_handler_registered(command_name: &str, handler_name: &str, replaced: bool) {
        if replaced {
            warn!(
                event = "handler_replaced",
                handler.command = command_name,
                handler.name = handler_name,
                "处理器被重新注册，旧处理器已被替换"
            );
        } else {
            info!(
                event = "handler_registered",
                handler.command = command_name,
                handler.name = handler_name,
                "处理器已注册"
            );
        }
    }

    pub fn log_scheduled_task_materialized(
        scheduled_task_id: i64,
        task_id: i64,
        next_run: DateTime<Utc>,
    ) {
        info!(
            event = "scheduled_task_materialized",
            scheduled_task.id = scheduled_task_id,
            task.id = task_id,
            scheduled_task.next_run = %next_run,
            "周期任务已物化为新任务"
        );
    }

    /// 存储写入最终失败，任务状态可能与实际执行结果不一致
    pub fn log_task_store_fault(task_id: Option<i64>, operation: &str, error_message: &str) {
        error!(
            event = "task_store_fault",
            task.id = task_id,
            store.operation = operation,
            error.message = error_message,
            "任务存储故障"
        );
    }

    pub fn log_store_retry(operation: &str, attempt: u32, max_attempts: u32, error_message: &str) {
        warn!(
            event = "task_store_retry",
            store.operation = operation,
            store.attempt = attempt,
            store.max_attempts = max_attempts,
            error.message = error_message,
            "存储操作失败，准备重试"
        );
    }

    pub fn log_recovery_summary(aborted: usize, requeued: usize) {
        info!(
            event = "startup_recovery",
            recovery.aborted = aborted,
            recovery.requeued = requeued,
            "启动恢复完成"
        );
    }

    pub fn log_pool_started(pool: &str, max_workers: usize) {
        debug!(
            event = "pool_started",
            pool.name = pool,
            pool.max_workers = max_workers,
            "工作池已启动"
        );
    }
}
