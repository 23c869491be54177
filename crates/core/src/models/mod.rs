//! # 数据模型
//!
//! 定义周期任务调度子系统的核心数据结构。
//!
//! ## 核心模型
//!
//! ### TaskDefinition - 任务定义
//! 持久化的任务配置：名称、目标处理器、interval/cron 调度规则、参数以及
//! 调度器回写的 `last_run_at`/`run_count`。
//!
//! ### ScheduleEntry - 调度条目
//! 由启用的任务定义派生出的内存结构，仅由 Beat 调度器持有，每次刷新整体重建。
//!
//! ### ExecutionRecord - 执行记录
//! 以 `invocation_id` 为键的执行追踪记录，由 Worker 侧的执行追踪器维护。
//!
//! ### TaskMessage / QueueName - 分发消息与优先级队列
//! Beat 调度器投递到优先级队列的消息格式，以及四个固定的队列名称。
//!
//! ## 状态流转
//!
//! ```text
//! PENDING → STARTED → SUCCESS
//!              ↓  ↑      
//!            RETRY       FAILURE
//! ```
//!
//! ## 数据库映射
//!
//! ### task_definitions 表
//! - `name` - 唯一任务名称
//! - `interval_seconds` 或 `cron_*` 五列 - 调度规则，二者必居其一
//! - `last_run_at` / `run_count` - 调度器回写的分发元数据
//!
//! ### execution_records 表
//! - `invocation_id` - 唯一调用ID
//! - `status` - 执行状态
//! - `start_time` / `complete_time` - 开始与完成时间

pub mod execution_record;
pub mod message;
pub mod queue;
pub mod schedule_entry;
pub mod task;

pub use execution_record::*;
pub use message::*;
pub use queue::*;
pub use schedule_entry::*;
pub use task::*;
