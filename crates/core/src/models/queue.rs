use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::SchedulerError;

/// 优先级队列名称
///
/// Worker 必须按 `system > priority_high > priority_low > default` 的顺序消费，
/// 排在前面的队列不会被后面的队列饿死。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    System,
    PriorityHigh,
    PriorityLow,
    Default,
}

impl QueueName {
    /// 固定的消费优先级顺序
    pub const CONSUMPTION_ORDER: [QueueName; 4] = [
        QueueName::System,
        QueueName::PriorityHigh,
        QueueName::PriorityLow,
        QueueName::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::System => "system",
            QueueName::PriorityHigh => "priority_high",
            QueueName::PriorityLow => "priority_low",
            QueueName::Default => "default",
        }
    }

    /// 数值越小优先级越高
    pub fn priority(&self) -> usize {
        match self {
            QueueName::System => 0,
            QueueName::PriorityHigh => 1,
            QueueName::PriorityLow => 2,
            QueueName::Default => 3,
        }
    }

    /// 按消费优先级排序并去重
    pub fn in_consumption_order(queues: &[QueueName]) -> Vec<QueueName> {
        let mut ordered: Vec<QueueName> = queues.to_vec();
        ordered.sort_by_key(QueueName::priority);
        ordered.dedup();
        ordered
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(QueueName::System),
            "priority_high" => Ok(QueueName::PriorityHigh),
            "priority_low" => Ok(QueueName::PriorityLow),
            "default" => Ok(QueueName::Default),
            _ => Err(SchedulerError::Configuration(format!("未知的队列名称: {s}"))),
        }
    }
}
