use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde_json::Value;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

use taskbeat_core::{
    config::WorkerConfig,
    models::{ExecutionStatus, QueueName, TaskMessage},
    traits::{Clock, FailurePayload, MessageQueue, PostRunPayload, TaskExecutionHooks, TaskInvocation},
    SchedulerError, SchedulerResult, StructuredLogger,
};

use crate::handlers::{HandlerRegistry, TaskError};

/// 一条消息的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success(Value),
    Failure { error: String },
    /// 已重新投递，`attempt` 为下一次尝试的序号
    Retried { attempt: u32 },
}

impl ExecutionOutcome {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionOutcome::Success(_) => ExecutionStatus::Success,
            ExecutionOutcome::Failure { .. } => ExecutionStatus::Failure,
            ExecutionOutcome::Retried { .. } => ExecutionStatus::Retry,
        }
    }
}

/// Worker 消费循环
///
/// 按队列优先级取消息，用信号量限制并发。每条消息在调用处理器前后触发执行钩子，
/// 处理器的错误、超时和 panic 都记录为 FAILURE，不会让 Worker 退出。
#[derive(Clone)]
pub struct WorkerService {
    worker_id: String,
    order: Vec<QueueName>,
    config: WorkerConfig,
    queue: Arc<dyn MessageQueue>,
    handlers: Arc<HandlerRegistry>,
    hooks: Arc<dyn TaskExecutionHooks>,
    clock: Arc<dyn Clock>,
    semaphore: Arc<Semaphore>,
}

impl WorkerService {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn MessageQueue>,
        handlers: Arc<HandlerRegistry>,
        hooks: Arc<dyn TaskExecutionHooks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            worker_id: config.worker_id.clone(),
            order: config.consumption_order(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1))),
            config,
            queue,
            handlers,
            hooks,
            clock,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn consumption_order(&self) -> &[QueueName] {
        &self.order
    }

    /// 运行消费循环直到收到关闭信号，返回前等待所有在途任务结束
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> SchedulerResult<()> {
        info!(
            "Worker {} 启动，消费队列 {:?}，最大并发 {}",
            self.worker_id,
            self.order.iter().map(QueueName::as_str).collect::<Vec<_>>(),
            self.config.max_concurrent_tasks
        );

        loop {
            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => permit
                    .map_err(|e| SchedulerError::Internal(format!("并发信号量已关闭: {e}")))?,
                _ = shutdown_rx.recv() => break,
            };

            match self.queue.consume_next(&self.order).await {
                Ok(Some(message)) => {
                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.process_message(message).await;
                        drop(permit);
                    });
                    continue;
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    error!("从队列取消息失败: {}", e);
                }
            }

            tokio::select! {
                _ = self.queue.wait_for_message(self.config.poll_interval()) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("Worker {} 收到关闭信号，等待在途任务结束", self.worker_id);
        let all = self.config.max_concurrent_tasks.max(1) as u32;
        if let Ok(permits) = self.semaphore.acquire_many(all).await {
            drop(permits);
        }
        info!("Worker {} 已停止", self.worker_id);
        Ok(())
    }

    /// 取出并处理一条消息，队列为空时返回 `None`
    pub async fn run_once(&self) -> SchedulerResult<Option<ExecutionOutcome>> {
        match self.queue.consume_next(&self.order).await? {
            Some(message) => Ok(Some(self.process_message(message).await)),
            None => Ok(None),
        }
    }

    /// 执行一条消息并触发全部执行钩子
    pub async fn process_message(&self, message: TaskMessage) -> ExecutionOutcome {
        let started = Instant::now();
        let invocation = TaskInvocation::from_message(&message, Some(self.worker_id.clone()));
        self.hooks.pre_run(&invocation).await;

        let outcome = self.execute(&message).await;
        let outcome = match outcome {
            Ok(value) => {
                self.hooks
                    .post_run(
                        &message.invocation_id,
                        &message.task_name,
                        PostRunPayload {
                            final_state: ExecutionStatus::Success,
                            result: Some(value.clone()),
                        },
                    )
                    .await;
                ExecutionOutcome::Success(value)
            }
            Err(TaskError::Retry { reason }) => self.retry(&message, &reason).await,
            Err(TaskError::Failed { message: error, traceback }) => {
                self.fail(&message, error, traceback).await
            }
        };

        let duration = started.elapsed();
        let status = outcome.status();
        counter!("taskbeat_executions_total", "status" => status.as_str()).increment(1);
        histogram!("taskbeat_execution_duration_seconds").record(duration.as_secs_f64());
        StructuredLogger::log_task_execution_complete(
            &message.invocation_id,
            &message.task_name,
            &self.worker_id,
            status,
            duration.as_millis() as u64,
        );
        outcome
    }

    async fn execute(&self, message: &TaskMessage) -> Result<Value, TaskError> {
        if message.is_expired(self.clock.now()) {
            return Err(TaskError::failed(format!(
                "消息已过期 (expires_at={})",
                message
                    .expires_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default()
            )));
        }

        let Some(handler) = self.handlers.get(&message.target) else {
            return Err(TaskError::failed(format!(
                "未注册的任务处理器: {}",
                message.target
            )));
        };

        let timeout = Duration::from_secs(
            message
                .timeout_seconds
                .unwrap_or(self.config.default_timeout_seconds),
        );

        let owned = message.clone();
        let join = tokio::spawn(async move { handler.handle(&owned).await });
        let abort = join.abort_handle();

        match tokio::time::timeout(timeout, join).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) if join_error.is_panic() => {
                let panic = panic_message(join_error.into_panic());
                Err(TaskError::with_traceback(
                    format!("任务处理器panic: {panic}"),
                    format!("panic in handler '{}': {panic}", message.target),
                ))
            }
            Ok(Err(join_error)) => Err(TaskError::failed(format!("任务被取消: {join_error}"))),
            Err(_) => {
                abort.abort();
                Err(TaskError::failed(format!(
                    "任务执行超时 ({}s)",
                    timeout.as_secs()
                )))
            }
        }
    }

    async fn retry(&self, message: &TaskMessage, reason: &str) -> ExecutionOutcome {
        let max_retries = self.config.max_retries;
        if message.attempt >= max_retries {
            return self
                .fail(
                    message,
                    format!("重试次数已耗尽 ({max_retries}): {reason}"),
                    format!("RetryLimitExceeded: {reason}"),
                )
                .await;
        }

        let next = message.next_attempt();
        self.hooks
            .post_run(
                &message.invocation_id,
                &message.task_name,
                PostRunPayload {
                    final_state: ExecutionStatus::Retry,
                    result: None,
                },
            )
            .await;

        if let Err(e) = self.queue.publish_message(next.queue, &next).await {
            warn!("重新投递任务 {} 失败: {}", message.invocation_id, e);
            return self
                .fail(
                    message,
                    format!("重试投递失败: {e}"),
                    format!("RetryPublishError: {e}"),
                )
                .await;
        }

        StructuredLogger::log_task_retry(
            &message.invocation_id,
            &message.task_name,
            next.attempt,
            max_retries,
            reason,
        );
        ExecutionOutcome::Retried {
            attempt: next.attempt,
        }
    }

    async fn fail(&self, message: &TaskMessage, error: String, traceback: String) -> ExecutionOutcome {
        debug!("任务 {} 执行失败: {}", message.invocation_id, error);
        self.hooks
            .on_failure(
                &message.invocation_id,
                &message.task_name,
                FailurePayload {
                    error: error.clone(),
                    traceback,
                },
            )
            .await;
        self.hooks
            .post_run(
                &message.invocation_id,
                &message.task_name,
                PostRunPayload {
                    final_state: ExecutionStatus::Failure,
                    result: None,
                },
            )
            .await;
        ExecutionOutcome::Failure { error }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
