//! 执行追踪器
//!
//! 在任务的每次执行尝试前后维护 `ExecutionRecord`：
//!
//! - `on_dispatch`: 消息投递后创建 PENDING 记录
//! - `pre_run`: 进入 STARTED，再次执行时 `retry_count` 加一，记录不存在时直接创建
//! - `post_run`: 写入最终状态和结果
//! - `on_failure`: 写入 FAILURE 和回溯信息
//!
//! 钩子本身只把写入命令交给 [`RecordWriter`]，不等待数据库；
//! 写入失败由写入池记录日志和计数，永远不会传回任务执行框架。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use taskbeat_core::{
    models::{AttemptOutcome, ExecutionRecord, ExecutionStatus, TaskMessage},
    traits::{
        Clock, ExecutionRecordRepository, FailurePayload, PostRunPayload, TaskExecutionHooks,
        TaskInvocation,
    },
    SchedulerResult,
};

use crate::record_writer::RecordWriter;

/// 一次执行记录写入
#[derive(Debug, Clone)]
pub enum RecordCommand {
    Dispatched {
        invocation_id: String,
        task_name: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        at: DateTime<Utc>,
    },
    PreRun {
        invocation: TaskInvocation,
        at: DateTime<Utc>,
    },
    PostRun {
        invocation_id: String,
        task_name: String,
        payload: PostRunPayload,
        at: DateTime<Utc>,
    },
    Failure {
        invocation_id: String,
        task_name: String,
        payload: FailurePayload,
        at: DateTime<Utc>,
    },
}

impl RecordCommand {
    pub fn invocation_id(&self) -> &str {
        match self {
            RecordCommand::Dispatched { invocation_id, .. }
            | RecordCommand::PostRun { invocation_id, .. }
            | RecordCommand::Failure { invocation_id, .. } => invocation_id,
            RecordCommand::PreRun { invocation, .. } => &invocation.invocation_id,
        }
    }

    pub fn hook_name(&self) -> &'static str {
        match self {
            RecordCommand::Dispatched { .. } => "on_dispatch",
            RecordCommand::PreRun { .. } => "pre_run",
            RecordCommand::PostRun { .. } => "post_run",
            RecordCommand::Failure { .. } => "on_failure",
        }
    }

    /// 把命令应用到仓储
    ///
    /// 返回写入后的记录；重复投递等无需写入的情况返回 `None`。
    pub async fn apply(
        &self,
        repo: &dyn ExecutionRecordRepository,
    ) -> SchedulerResult<Option<ExecutionRecord>> {
        match self {
            RecordCommand::Dispatched {
                invocation_id,
                task_name,
                args,
                kwargs,
                at,
            } => {
                if repo.get_by_invocation_id(invocation_id).await?.is_some() {
                    return Ok(None);
                }
                let record =
                    ExecutionRecord::pending(invocation_id, task_name, args.clone(), kwargs.clone(), *at);
                repo.create(&record).await.map(Some)
            }

            RecordCommand::PreRun { invocation, at } => {
                let Some(mut record) = repo.get_by_invocation_id(&invocation.invocation_id).await?
                else {
                    let mut record = ExecutionRecord::started(
                        &invocation.invocation_id,
                        &invocation.task_name,
                        invocation.args.clone(),
                        invocation.kwargs.clone(),
                        *at,
                    );
                    record.worker_id = invocation.worker_id.clone();
                    return repo.create(&record).await.map(Some);
                };

                if record.begin_attempt(*at) == AttemptOutcome::AlreadyFinished {
                    debug!(
                        "执行记录 {} 已结束({})，忽略重复投递",
                        record.invocation_id, record.status
                    );
                    return Ok(None);
                }
                if invocation.worker_id.is_some() {
                    record.worker_id = invocation.worker_id.clone();
                }
                repo.update(&record).await?;
                Ok(Some(record))
            }

            RecordCommand::PostRun {
                invocation_id,
                task_name,
                payload,
                at,
            } => {
                let mut record = Self::load_for_finish(repo, invocation_id, task_name, *at).await?;
                if !record.finish(payload.final_state, payload.result.clone(), *at)? {
                    return Ok(None);
                }
                Self::save(repo, &record).await?;
                Ok(Some(record))
            }

            RecordCommand::Failure {
                invocation_id,
                task_name,
                payload,
                at,
            } => {
                let mut record = Self::load_for_finish(repo, invocation_id, task_name, *at).await?;
                if !record.fail(payload.traceback.clone(), *at)? {
                    return Ok(None);
                }
                Self::save(repo, &record).await?;
                Ok(Some(record))
            }
        }
    }

    /// 读取待结束的记录
    ///
    /// pre-run 的写入丢失时记录可能仍是 PENDING 或根本不存在，这里先补齐 STARTED，
    /// 保证记录最终能进入终态。重新投递失败时记录停在 RETRY，同样先回到 STARTED。
    async fn load_for_finish(
        repo: &dyn ExecutionRecordRepository,
        invocation_id: &str,
        task_name: &str,
        at: DateTime<Utc>,
    ) -> SchedulerResult<ExecutionRecord> {
        let mut record = match repo.get_by_invocation_id(invocation_id).await? {
            Some(record) => record,
            None => ExecutionRecord::started(invocation_id, task_name, Vec::new(), Map::new(), at),
        };
        match record.status {
            ExecutionStatus::Pending => {
                record.begin_attempt(at);
            }
            ExecutionStatus::Retry => record.resume_attempt(at),
            _ => {}
        }
        Ok(record)
    }

    async fn save(repo: &dyn ExecutionRecordRepository, record: &ExecutionRecord) -> SchedulerResult<()> {
        if record.id == 0 {
            repo.create(record).await?;
        } else {
            repo.update(record).await?;
        }
        Ok(())
    }
}

/// 执行追踪钩子的实现
pub struct ExecutionTracker {
    writer: Arc<RecordWriter>,
    clock: Arc<dyn Clock>,
    skip_prefixes: Vec<String>,
}

impl ExecutionTracker {
    pub fn new(writer: Arc<RecordWriter>, clock: Arc<dyn Clock>, skip_prefixes: Vec<String>) -> Self {
        Self {
            writer,
            clock,
            skip_prefixes,
        }
    }

    /// 框架内部任务不写执行记录
    pub fn is_tracked(&self, task_name: &str) -> bool {
        !self
            .skip_prefixes
            .iter()
            .any(|prefix| task_name.starts_with(prefix.as_str()))
    }

    /// 等待已提交的写入全部完成
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    async fn submit(&self, task_name: &str, command: RecordCommand) {
        if !self.is_tracked(task_name) {
            debug!("任务 {} 不记录执行记录", task_name);
            return;
        }
        self.writer.submit(command).await;
    }
}

#[async_trait]
impl TaskExecutionHooks for ExecutionTracker {
    async fn on_dispatch(&self, message: &TaskMessage) {
        let command = RecordCommand::Dispatched {
            invocation_id: message.invocation_id.clone(),
            task_name: message.task_name.clone(),
            args: message.args.clone(),
            kwargs: message.kwargs.clone(),
            at: self.clock.now(),
        };
        self.submit(&message.task_name, command).await;
    }

    async fn pre_run(&self, invocation: &TaskInvocation) {
        let command = RecordCommand::PreRun {
            invocation: invocation.clone(),
            at: self.clock.now(),
        };
        self.submit(&invocation.task_name, command).await;
    }

    async fn post_run(&self, invocation_id: &str, task_name: &str, payload: PostRunPayload) {
        let command = RecordCommand::PostRun {
            invocation_id: invocation_id.to_string(),
            task_name: task_name.to_string(),
            payload,
            at: self.clock.now(),
        };
        self.submit(task_name, command).await;
    }

    async fn on_failure(&self, invocation_id: &str, task_name: &str, payload: FailurePayload) {
        let command = RecordCommand::Failure {
            invocation_id: invocation_id.to_string(),
            task_name: task_name.to_string(),
            payload,
            at: self.clock.now(),
        };
        self.submit(task_name, command).await;
    }
}
