use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::models::{ExecutionStatus, QueueName};

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_schedule_refreshed(entry_count: usize, skipped: usize, duration_ms: u64) {
        info!(
            event = "schedule_refreshed",
            schedule.entries = entry_count,
            schedule.skipped = skipped,
            schedule.duration_ms = duration_ms,
            "调度表已刷新"
        );
    }

    pub fn log_schedule_refresh_failed(attempts: u32, error: &dyn std::error::Error) {
        error!(
            event = "schedule_refresh_failed",
            schedule.attempts = attempts,
            error = %error,
            "调度表刷新失败，继续使用旧的调度表"
        );
    }

    pub fn log_entry_skipped(task_name: &str, reason: &str) {
        warn!(
            event = "entry_skipped",
            task.name = task_name,
            reason = reason,
            "跳过无效的调度项"
        );
    }

    pub fn log_task_dispatched(
        task_name: &str,
        invocation_id: &str,
        queue: QueueName,
        dispatched_at: DateTime<Utc>,
    ) {
        info!(
            event = "task_dispatched",
            task.name = task_name,
            task.invocation_id = invocation_id,
            task.queue = %queue,
            task.dispatched_at = %dispatched_at,
            "任务已分发"
        );
    }

    pub fn log_dispatch_failed(task_name: &str, queue: QueueName, error: &dyn std::error::Error) {
        error!(
            event = "dispatch_failed",
            task.name = task_name,
            task.queue = %queue,
            error = %error,
            "任务分发失败，将在下一次检查时重试"
        );
    }

    pub fn log_dispatch_write_failed(task_name: &str, attempts: u32, error: &dyn std::error::Error) {
        error!(
            event = "dispatch_write_failed",
            task.name = task_name,
            store.attempts = attempts,
            error = %error,
            "回写分发元数据失败"
        );
    }

    pub fn log_execution_recorded(
        invocation_id: &str,
        task_name: &str,
        status: ExecutionStatus,
        retry_count: i32,
    ) {
        debug!(
            event = "execution_recorded",
            task.invocation_id = invocation_id,
            task.name = task_name,
            task.status = %status,
            task.retry_count = retry_count,
            "执行记录已更新"
        );
    }

    pub fn log_hook_failed(hook: &str, invocation_id: &str, error: &dyn std::error::Error) {
        error!(
            event = "hook_failed",
            hook = hook,
            task.invocation_id = invocation_id,
            error = %error,
            "执行追踪钩子失败，任务执行不受影响"
        );
    }

    pub fn log_task_execution_complete(
        invocation_id: &str,
        task_name: &str,
        worker_id: &str,
        status: ExecutionStatus,
        duration_ms: u64,
    ) {
        if status == ExecutionStatus::Success {
            info!(
                event = "task_execution_complete",
                task.invocation_id = invocation_id,
                task.name = task_name,
                worker.id = worker_id,
                task.status = %status,
                task.duration_ms = duration_ms,
                "任务执行完成"
            );
        } else {
            warn!(
                event = "task_execution_complete",
                task.invocation_id = invocation_id,
                task.name = task_name,
                worker.id = worker_id,
                task.status = %status,
                task.duration_ms = duration_ms,
                "任务执行未成功"
            );
        }
    }

    pub fn log_task_retry(invocation_id: &str, task_name: &str, attempt: u32, max_retries: u32, reason: &str) {
        warn!(
            event = "task_retry",
            task.invocation_id = invocation_id,
            task.name = task_name,
            task.attempt = attempt,
            task.max_retries = max_retries,
            task.retry_reason = reason,
            "任务将重试"
        );
    }
}
