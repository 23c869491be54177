//! Beat 调度器
//!
//! 从存储加载启用的任务定义，按 interval/cron 规则判断到期，
//! 将到期任务路由到优先级队列并回写分发元数据。

pub mod router;
pub mod schedule_matcher;
pub mod schedule_store;
pub mod scheduler;

pub use router::TaskRouter;
pub use schedule_matcher::{is_due, CompiledSchedule, CronPattern, DueCheck, PatternError};
pub use schedule_store::{LoadedSchedule, ScheduleStore, ScheduledTask};
pub use scheduler::{BeatScheduler, TickReport};
