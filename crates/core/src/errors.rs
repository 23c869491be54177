use thiserror::Error;

use crate::models::ExecutionStatus;

/// 调度器错误类型定义
///
/// 前五个变体与调度子系统的错误分类一一对应，其余为存储、队列等基础设施错误。
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// 刷新调度表时存储不可达
    #[error("加载任务定义失败: {0}")]
    ConfigLoad(String),

    /// 单个任务定义的 interval/cron 字段格式错误
    #[error("任务 {name} 的调度配置无效: {message}")]
    ScheduleParse { name: String, message: String },

    /// 持久化 last_run_at/run_count 失败
    #[error("任务 {name} 的分发元数据写入失败: {message}")]
    DispatchWrite { name: String, message: String },

    /// 执行追踪钩子内部错误
    #[error("执行钩子错误: {0}")]
    SignalHandler(String),

    /// 任务本身执行失败
    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("任务名称已存在: {name}")]
    DuplicateTaskName { name: String },

    #[error("任务未找到: {name}")]
    TaskNotFound { name: String },

    #[error("执行记录未找到: {invocation_id}")]
    ExecutionRecordNotFound { invocation_id: String },

    #[error("非法的执行状态转换: {from} -> {to}")]
    InvalidStatusTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn schedule_parse(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ScheduleParse {
            name: name.into(),
            message: message.into(),
        }
    }

    /// 重试能否改变结果
    ///
    /// 数据本身的问题（任务不存在、名称冲突、格式错误）重试也不会成功。
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SchedulerError::ScheduleParse { .. }
                | SchedulerError::DuplicateTaskName { .. }
                | SchedulerError::TaskNotFound { .. }
                | SchedulerError::ExecutionRecordNotFound { .. }
                | SchedulerError::InvalidStatusTransition { .. }
                | SchedulerError::Serialization(_)
                | SchedulerError::Configuration(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}
