use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::models::{ExecutionStatus, TaskMessage};

/// 一次任务执行尝试的描述
#[derive(Debug, Clone)]
pub struct TaskInvocation {
    pub invocation_id: String,
    pub task_name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub worker_id: Option<String>,
}

impl TaskInvocation {
    pub fn from_message(message: &TaskMessage, worker_id: Option<String>) -> Self {
        Self {
            invocation_id: message.invocation_id.clone(),
            task_name: message.task_name.clone(),
            args: message.args.clone(),
            kwargs: message.kwargs.clone(),
            worker_id,
        }
    }
}

/// post-run 钩子的负载
#[derive(Debug, Clone)]
pub struct PostRunPayload {
    pub final_state: ExecutionStatus,
    pub result: Option<Value>,
}

/// on-failure 钩子的负载
#[derive(Debug, Clone)]
pub struct FailurePayload {
    pub error: String,
    pub traceback: String,
}

/// 任务执行钩子接口
///
/// 由执行框架在每次任务尝试前后调用。所有方法都不返回错误：
/// 实现方必须在内部捕获并记录自身的失败，记账失败不能中断任务本身的执行。
/// 对同一 `invocation_id` 的重复调用必须是安全的。
#[async_trait]
pub trait TaskExecutionHooks: Send + Sync {
    /// 消息投递到队列之后调用
    async fn on_dispatch(&self, _message: &TaskMessage) {}

    /// 任务开始执行前调用
    async fn pre_run(&self, invocation: &TaskInvocation);

    /// 任务执行结束后调用
    async fn post_run(&self, invocation_id: &str, task_name: &str, payload: PostRunPayload);

    /// 任务执行失败时调用
    async fn on_failure(&self, invocation_id: &str, task_name: &str, payload: FailurePayload);
}
