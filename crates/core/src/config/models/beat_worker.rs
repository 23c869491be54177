use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::QueueName;

/// 消息过期时间上限（一年）
pub const MAX_MESSAGE_EXPIRY_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Beat 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    pub enabled: bool,
    /// 距上次刷新超过该间隔即重新加载调度表
    pub refresh_interval_seconds: u64,
    /// 两次 tick 之间的最短休眠
    pub min_sleep_seconds: u64,
    /// 两次 tick 之间的最长休眠
    pub max_sleep_seconds: u64,
    /// 读写存储失败时的最大尝试次数
    pub store_retry_attempts: u32,
    pub store_retry_backoff_ms: u64,
    /// 分发消息的过期时间，不设置则永不过期
    pub message_expiry_seconds: Option<u64>,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_seconds: 30,
            min_sleep_seconds: 1,
            max_sleep_seconds: 300,
            store_retry_attempts: 3,
            store_retry_backoff_ms: 200,
            message_expiry_seconds: None,
        }
    }
}

impl BeatConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    pub fn min_sleep(&self) -> Duration {
        Duration::from_secs(self.min_sleep_seconds)
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.max_sleep_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.refresh_interval_seconds == 0 {
            return Err(anyhow::anyhow!("刷新间隔必须大于0"));
        }

        if self.min_sleep_seconds == 0 {
            return Err(anyhow::anyhow!("最短休眠时间必须大于0"));
        }

        if self.min_sleep_seconds > self.max_sleep_seconds {
            return Err(anyhow::anyhow!("最短休眠时间不能大于最长休眠时间"));
        }

        if self.store_retry_attempts == 0 {
            return Err(anyhow::anyhow!("存储重试次数必须大于0"));
        }

        if self.message_expiry_seconds == Some(0) {
            return Err(anyhow::anyhow!("消息过期时间必须大于0"));
        }

        if self
            .message_expiry_seconds
            .is_some_and(|secs| secs > MAX_MESSAGE_EXPIRY_SECONDS)
        {
            return Err(anyhow::anyhow!(
                "消息过期时间不能超过 {} 秒",
                MAX_MESSAGE_EXPIRY_SECONDS
            ));
        }

        Ok(())
    }
}

/// Worker 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_id: String,
    /// 消费的队列，实际消费顺序总是按队列优先级排列
    pub queues: Vec<QueueName>,
    pub max_concurrent_tasks: usize,
    pub poll_interval_ms: u64,
    pub default_timeout_seconds: u64,
    pub max_retries: u32,
    pub record_writer_workers: usize,
    pub record_writer_capacity: usize,
    /// 名称以这些前缀开头的任务不写执行记录
    pub skip_task_prefixes: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let worker_id = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .map(|h| format!("{h}-worker"))
            .unwrap_or_else(|| "worker-001".to_string());

        Self {
            enabled: true,
            worker_id,
            queues: QueueName::CONSUMPTION_ORDER.to_vec(),
            max_concurrent_tasks: 4,
            poll_interval_ms: 500,
            default_timeout_seconds: 300,
            max_retries: 3,
            record_writer_workers: 2,
            record_writer_capacity: 256,
            skip_task_prefixes: vec!["taskbeat.".to_string()],
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn consumption_order(&self) -> Vec<QueueName> {
        QueueName::in_consumption_order(&self.queues)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            return Err(anyhow::anyhow!("Worker ID不能为空"));
        }

        if self.queues.is_empty() {
            return Err(anyhow::anyhow!("Worker必须至少消费一个队列"));
        }

        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }

        if self.default_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("默认超时时间必须大于0"));
        }

        if self.record_writer_workers == 0 || self.record_writer_capacity == 0 {
            return Err(anyhow::anyhow!("执行记录写入池的大小和容量必须大于0"));
        }

        Ok(())
    }
}
