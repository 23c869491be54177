//! 测试数据构建器

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use taskbeat_core::models::{
    CronFields, ExtraConfig, QueueName, ScheduleKind, TaskDefinition, TaskMessage,
};

/// 任务定义构建器
pub struct TaskDefinitionBuilder {
    task: TaskDefinition,
}

impl TaskDefinitionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            task: TaskDefinition::interval(name, "builtin.echo", 60),
        }
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.task.target = target.to_string();
        self
    }

    pub fn every_seconds(mut self, seconds: u64) -> Self {
        self.task.schedule = ScheduleKind::Interval { seconds };
        self
    }

    /// 使用五段式表达式设置 cron 调度
    pub fn with_cron(mut self, expression: &str) -> Self {
        let fields = CronFields::from_expression(expression)
            .unwrap_or_else(|e| panic!("invalid cron expression in test: {e}"));
        self.task.schedule = ScheduleKind::Cron(fields);
        self
    }

    pub fn with_cron_fields(mut self, fields: CronFields) -> Self {
        self.task.schedule = ScheduleKind::Cron(fields);
        self
    }

    pub fn with_queue(mut self, queue: &str) -> Self {
        self.task.extra_config.queue = Some(queue.to_string());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.task.extra_config.timeout = Some(seconds);
        self
    }

    pub fn with_extra_config(mut self, extra_config: ExtraConfig) -> Self {
        self.task.extra_config = extra_config;
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.task.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.task.kwargs = kwargs;
        self
    }

    pub fn last_run_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.last_run_at = Some(at);
        self
    }

    pub fn run_count(mut self, count: i64) -> Self {
        self.task.run_count = count;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.task.enabled = false;
        self
    }

    pub fn build(self) -> TaskDefinition {
        self.task
    }
}

/// 任务消息构建器
pub struct TaskMessageBuilder {
    message: TaskMessage,
}

impl TaskMessageBuilder {
    pub fn new(task_name: &str) -> Self {
        Self {
            message: TaskMessage {
                invocation_id: format!("inv-{task_name}"),
                task_name: task_name.to_string(),
                target: "builtin.echo".to_string(),
                args: Vec::new(),
                kwargs: Map::new(),
                queue: QueueName::PriorityLow,
                timeout_seconds: None,
                task_type: None,
                dispatched_at: Utc::now(),
                expires_at: None,
                attempt: 0,
            },
        }
    }

    pub fn with_invocation_id(mut self, invocation_id: &str) -> Self {
        self.message.invocation_id = invocation_id.to_string();
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.message.target = target.to_string();
        self
    }

    pub fn with_queue(mut self, queue: QueueName) -> Self {
        self.message.queue = queue;
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.message.args = args;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.message.timeout_seconds = Some(seconds);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.message.expires_at = Some(at);
        self
    }

    pub fn build(self) -> TaskMessage {
        self.message
    }
}
