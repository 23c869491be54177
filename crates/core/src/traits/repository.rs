//! 数据仓储层接口定义
//!
//! 此模块定义了调度子系统仅有的两类持久化状态：
//! - 任务定义仓储接口 (TaskDefinitionRepository)
//! - 执行记录仓储接口 (ExecutionRecordRepository)
//!
//! ## 设计原则
//!
//! ### 窄写入面
//! Beat 调度器对任务定义只有两种访问：读取全部启用的定义，以及回写
//! `last_run_at`/`run_count`。其余写操作属于外部的 CRUD 层，这里提供它们
//! 是为了种子任务注册和测试。
//!
//! ### 单一所有者
//! 执行记录只由执行追踪器写入，并以 `invocation_id` 唯一定位，
//! 并发的 Worker 不会争用同一行。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use taskbeat_core::traits::TaskDefinitionRepository;
//!
//! async fn show(repo: &dyn TaskDefinitionRepository) -> SchedulerResult<()> {
//!     for task in repo.list_enabled().await? {
//!         println!("{} -> {}", task.name, task.schedule.describe());
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ExecutionRecord, ExecutionRecordFilter, TaskDefinition};
use crate::SchedulerResult;

/// 任务定义仓储接口
#[async_trait]
pub trait TaskDefinitionRepository: Send + Sync {
    /// 创建新任务定义
    ///
    /// # 错误
    ///
    /// * `DuplicateTaskName` - 任务名称已存在
    /// * `Database` - 数据库操作失败
    async fn create(&self, task: &TaskDefinition) -> SchedulerResult<TaskDefinition>;

    /// 根据名称获取任务定义
    async fn get_by_name(&self, name: &str) -> SchedulerResult<Option<TaskDefinition>>;

    /// 更新任务定义的可编辑字段（不包括分发元数据）
    async fn update(&self, task: &TaskDefinition) -> SchedulerResult<()>;

    /// 启用或禁用任务
    async fn set_enabled(&self, name: &str, enabled: bool) -> SchedulerResult<()>;

    /// 删除任务定义
    async fn delete(&self, name: &str) -> SchedulerResult<()>;

    /// 获取全部启用的任务定义
    ///
    /// 无法解码的行会被记录日志并跳过，不影响其它任务。
    async fn list_enabled(&self) -> SchedulerResult<Vec<TaskDefinition>>;

    /// 回写分发元数据
    ///
    /// `last_run_at` 只会前进，`run_count` 只会增大；旧值不会覆盖新值。
    ///
    /// # 错误
    ///
    /// * `TaskNotFound` - 任务定义已被删除
    async fn update_dispatch_metadata(
        &self,
        name: &str,
        last_run_at: DateTime<Utc>,
        run_count: i64,
    ) -> SchedulerResult<()>;
}

/// 执行记录仓储接口
#[async_trait]
pub trait ExecutionRecordRepository: Send + Sync {
    /// 创建执行记录，`invocation_id` 重复时返回错误
    async fn create(&self, record: &ExecutionRecord) -> SchedulerResult<ExecutionRecord>;

    /// 根据调用ID获取执行记录
    async fn get_by_invocation_id(
        &self,
        invocation_id: &str,
    ) -> SchedulerResult<Option<ExecutionRecord>>;

    /// 按 `invocation_id` 更新执行记录
    async fn update(&self, record: &ExecutionRecord) -> SchedulerResult<()>;

    /// 按名称/状态过滤查询，按创建时间倒序
    async fn list(&self, filter: &ExecutionRecordFilter) -> SchedulerResult<Vec<ExecutionRecord>>;
}
