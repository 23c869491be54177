use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{QueueName, ScheduleEntry};

/// 投递到优先级队列的任务消息
///
/// 每条消息携带唯一的 `invocation_id`，执行追踪器以此为键维护执行记录。
/// 重试时重新投递同一条消息，`invocation_id` 保持不变，`attempt` 递增。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub invocation_id: String,
    pub task_name: String,
    pub target: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub queue: QueueName,
    pub timeout_seconds: Option<u64>,
    pub task_type: Option<String>,
    pub dispatched_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub attempt: u32,
}

impl TaskMessage {
    /// 由调度条目生成一条新的分发消息
    pub fn from_entry(entry: &ScheduleEntry, queue: QueueName, now: DateTime<Utc>) -> Self {
        let expires_at = entry
            .options
            .expires_in_seconds
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl));

        Self {
            invocation_id: uuid::Uuid::new_v4().to_string(),
            task_name: entry.name.clone(),
            target: entry.target.clone(),
            args: entry.args.clone(),
            kwargs: entry.kwargs.clone(),
            queue,
            timeout_seconds: entry.extra_config.timeout,
            task_type: entry.extra_config.task_type.clone(),
            dispatched_at: now,
            expires_at,
            attempt: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// 生成用于重试的同一调用的下一次投递
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.attempt += 1;
        next
    }
}
