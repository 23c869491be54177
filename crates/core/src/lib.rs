pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::*;
pub use errors::*;
pub use logging::*;
pub use models::{
    CronFields, ExecutionRecord, ExecutionRecordFilter, ExecutionStatus, ExtraConfig, QueueName,
    ScheduleEntry, ScheduleKind, ScheduleSnapshotItem, TaskDefinition, TaskMessage,
};
pub use traits::{
    Clock, ExecutionRecordRepository, FailurePayload, MessageQueue, PostRunPayload, SystemClock,
    TaskDefinitionRepository, TaskExecutionHooks, TaskInvocation,
};

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
