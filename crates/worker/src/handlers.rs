use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use taskbeat_core::models::TaskMessage;

/// 任务处理器返回的错误
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// 执行失败，记录为 FAILURE
    #[error("{message}")]
    Failed { message: String, traceback: String },

    /// 请求以同一个调用ID重新投递
    #[error("请求重试: {reason}")]
    Retry { reason: String },
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        let traceback = format!("TaskError: {message}");
        Self::Failed { message, traceback }
    }

    pub fn with_traceback(message: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            traceback: traceback.into(),
        }
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Self::Retry {
            reason: reason.into(),
        }
    }
}

/// 任务处理器
///
/// 以消息的 `target` 注册。返回值写入执行记录的 `result` 列。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, message: &TaskMessage) -> Result<Value, TaskError>;
}

/// 把异步闭包包装成处理器
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskError>> + Send,
{
    async fn handle(&self, message: &TaskMessage) -> Result<Value, TaskError> {
        (self.f)(message.clone()).await
    }
}

/// target 到处理器的映射，启动时构建，之后只读
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, target: impl Into<String>, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(target.into(), handler);
        self
    }

    pub fn register_fn<F, Fut>(&mut self, target: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(TaskMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        self.register(target, Arc::new(FnHandler::new(f)))
    }

    pub fn get(&self, target: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(target).cloned()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.handlers.contains_key(target)
    }

    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.handlers.keys().cloned().collect();
        targets.sort();
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use taskbeat_core::models::QueueName;

    fn message(target: &str) -> TaskMessage {
        TaskMessage {
            invocation_id: "inv-1".to_string(),
            task_name: "job".to_string(),
            target: target.to_string(),
            args: vec![json!(2), json!(3)],
            kwargs: Default::default(),
            queue: QueueName::PriorityLow,
            timeout_seconds: None,
            task_type: None,
            dispatched_at: Utc::now(),
            expires_at: None,
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn test_register_and_invoke_fn_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("math.sum", |message: TaskMessage| async move {
            let sum: i64 = message.args.iter().filter_map(Value::as_i64).sum();
            Ok::<Value, TaskError>(json!(sum))
        });

        assert!(registry.contains("math.sum"));
        assert_eq!(registry.targets(), vec!["math.sum"]);

        let handler = registry.get("math.sum").unwrap();
        let result = handler.handle(&message("math.sum")).await.unwrap();
        assert_eq!(result, json!(5));
        assert!(registry.get("math.product").is_none());
    }

    #[test]
    fn test_task_error_traceback() {
        let err = TaskError::failed("division by zero");
        match err {
            TaskError::Failed { message, traceback } => {
                assert_eq!(message, "division by zero");
                assert!(traceback.contains("division by zero"));
            }
            TaskError::Retry { .. } => panic!("expected failure"),
        }
        assert_eq!(TaskError::retry("busy").to_string(), "请求重试: busy");
    }
}
