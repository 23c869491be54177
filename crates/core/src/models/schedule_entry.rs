use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ExtraConfig, QueueName, ScheduleKind, TaskDefinition};

/// 调度条目的投递选项
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOptions {
    /// 消息过期时间（秒），超过后 Worker 不再执行
    pub expires_in_seconds: Option<u64>,
}

/// 调度条目
///
/// 由启用的 [`TaskDefinition`] 派生的内存结构，只在 Beat 调度器进程内存在。
/// 每次刷新都会整体重建，两次刷新之间只有分发时间与计数会被调度器更新。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub name: String,
    pub target: String,
    pub schedule: ScheduleKind,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub extra_config: ExtraConfig,
    pub options: ScheduleOptions,
    pub last_run_at: Option<DateTime<Utc>>,
    pub total_run_count: i64,
}

impl ScheduleEntry {
    pub fn from_definition(definition: &TaskDefinition, options: ScheduleOptions) -> Self {
        Self {
            name: definition.name.clone(),
            target: definition.target.clone(),
            schedule: definition.schedule.clone(),
            args: definition.args.clone(),
            kwargs: definition.kwargs.clone(),
            extra_config: definition.extra_config.clone(),
            options,
            last_run_at: definition.last_run_at,
            total_run_count: definition.run_count,
        }
    }

    /// 记录一次分发，`last_run_at` 只会前进
    pub fn mark_dispatched(&mut self, run_at: DateTime<Utc>) {
        if self.last_run_at.map_or(true, |last| last < run_at) {
            self.last_run_at = Some(run_at);
        }
        self.total_run_count += 1;
    }
}

/// 调度快照中的一项，供运维查询使用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSnapshotItem {
    pub name: String,
    pub target: String,
    pub schedule: String,
    pub queue: QueueName,
    pub due_in_seconds: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count: i64,
}
