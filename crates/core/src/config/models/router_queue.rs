use serde::{Deserialize, Serialize};

use crate::models::QueueName;

/// 任务路由配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// `target` 以这些前缀开头的任务一律进入 `system` 队列
    pub system_target_prefixes: Vec<String>,
    /// 没有有效覆盖时使用的队列
    pub default_queue: QueueName,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            system_target_prefixes: vec!["system.".to_string()],
            default_queue: QueueName::PriorityLow,
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.system_target_prefixes.iter().any(|p| p.trim().is_empty()) {
            return Err(anyhow::anyhow!("系统任务前缀不能为空字符串"));
        }

        if self.default_queue == QueueName::System {
            return Err(anyhow::anyhow!("默认队列不能是system队列"));
        }

        Ok(())
    }
}

/// 队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 单个队列的最大消息数（0表示无限制）
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
        }
    }
}
