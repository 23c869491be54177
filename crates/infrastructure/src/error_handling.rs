//! 仓储操作的错误映射
//!
//! 把 sqlx 错误转换为带上下文的 `SchedulerError` 并记录日志。
//! 唯一约束冲突被映射为领域错误，其余数据库错误原样保留。

use std::fmt;

use sqlx::Error as SqlxError;
use taskbeat_core::SchedulerError;
use tracing::error;

/// 仓储操作类型
#[derive(Debug, Clone, Copy)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Delete,
    Query,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Delete => write!(f, "删除"),
            RepositoryOperation::Query => write!(f, "列表查询"),
        }
    }
}

pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    fn is_unique_violation(error: &SqlxError) -> bool {
        matches!(error, SqlxError::Database(db_error) if db_error.is_unique_violation())
    }

    /// 任务定义相关的数据库错误
    pub fn task_definition_error(
        operation: RepositoryOperation,
        name: &str,
        error: SqlxError,
    ) -> SchedulerError {
        if Self::is_unique_violation(&error) {
            error!(error = %error, task.name = name, "{}任务定义时名称冲突", operation);
            return SchedulerError::DuplicateTaskName {
                name: name.to_string(),
            };
        }

        error!(error = %error, task.name = name, "{}任务定义 '{}' 时发生数据库错误", operation, name);
        SchedulerError::Database(error)
    }

    /// 执行记录相关的数据库错误
    pub fn execution_record_error(
        operation: RepositoryOperation,
        invocation_id: &str,
        error: SqlxError,
    ) -> SchedulerError {
        if Self::is_unique_violation(&error) {
            error!(error = %error, task.invocation_id = invocation_id, "{}执行记录时调用ID冲突", operation);
            return SchedulerError::Internal(format!("执行记录已存在: {invocation_id}"));
        }

        error!(
            error = %error,
            task.invocation_id = invocation_id,
            "{}执行记录 '{}' 时发生数据库错误",
            operation,
            invocation_id
        );
        SchedulerError::Database(error)
    }

    /// JSON 列的编解码错误
    pub fn json_column_error(entity: &str, column: &str, error: serde_json::Error) -> SchedulerError {
        error!(error = %error, column = column, "{} 的 {} 列JSON编解码失败", entity, column);
        SchedulerError::Serialization(format!("{entity}.{column}: {error}"))
    }
}
