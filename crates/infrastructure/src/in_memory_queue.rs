use async_trait::async_trait;
use metrics::{counter, gauge};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use taskbeat_core::{
    config::QueueConfig,
    models::{QueueName, TaskMessage},
    traits::MessageQueue,
    SchedulerError, SchedulerResult,
};

/// 进程内优先级队列
///
/// 四个命名队列各自是一个 FIFO。消费方传入优先级顺序，每次从第一个非空的
/// 队列取消息，所以只要 `system` 里还有消息，低优先级队列就不会被取到。
#[derive(Debug)]
pub struct PriorityQueueFabric {
    queues: Mutex<HashMap<QueueName, VecDeque<TaskMessage>>>,
    /// 每次发布唤醒一个等待中的消费者
    notify: Notify,
    config: QueueConfig,
}

impl PriorityQueueFabric {
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        info!("创建进程内优先级队列，单队列容量上限 {}", config.max_queue_size);
        let queues = QueueName::CONSUMPTION_ORDER
            .iter()
            .map(|queue| (*queue, VecDeque::new()))
            .collect();

        Self {
            queues: Mutex::new(queues),
            notify: Notify::new(),
            config,
        }
    }

    /// 所有队列中的消息总数
    pub async fn total_size(&self) -> usize {
        self.queues.lock().await.values().map(VecDeque::len).sum()
    }
}

impl Default for PriorityQueueFabric {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for PriorityQueueFabric {
    async fn publish_message(&self, queue: QueueName, message: &TaskMessage) -> SchedulerResult<()> {
        {
            let mut queues = self.queues.lock().await;
            let pending = queues.entry(queue).or_default();

            // 0 表示不限制
            if self.config.max_queue_size > 0 && pending.len() >= self.config.max_queue_size {
                warn!("队列 {} 已满 ({} 条)，拒绝消息 {}", queue, pending.len(), message.invocation_id);
                counter!("taskbeat_queue_rejected_total", "queue" => queue.as_str()).increment(1);
                return Err(SchedulerError::MessageQueue(format!(
                    "队列 {queue} 已达到容量上限 {}",
                    self.config.max_queue_size
                )));
            }

            pending.push_back(message.clone());
            gauge!("taskbeat_queue_depth", "queue" => queue.as_str()).set(pending.len() as f64);
        }

        debug!("消息 {} 已发布到队列 {}", message.invocation_id, queue);
        self.notify.notify_one();
        Ok(())
    }

    async fn consume_next(&self, order: &[QueueName]) -> SchedulerResult<Option<TaskMessage>> {
        let mut queues = self.queues.lock().await;
        for queue in order {
            if let Some(pending) = queues.get_mut(queue) {
                if let Some(message) = pending.pop_front() {
                    gauge!("taskbeat_queue_depth", "queue" => queue.as_str())
                        .set(pending.len() as f64);
                    debug!("从队列 {} 取出消息 {}", queue, message.invocation_id);
                    return Ok(Some(message));
                }
            }
        }
        Ok(None)
    }

    async fn wait_for_message(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }

    async fn get_queue_size(&self, queue: QueueName) -> SchedulerResult<u32> {
        let queues = self.queues.lock().await;
        Ok(queues.get(&queue).map_or(0, |pending| pending.len() as u32))
    }

    async fn purge_queue(&self, queue: QueueName) -> SchedulerResult<()> {
        let mut queues = self.queues.lock().await;
        if let Some(pending) = queues.get_mut(&queue) {
            let purged = pending.len();
            pending.clear();
            gauge!("taskbeat_queue_depth", "queue" => queue.as_str()).set(0.0);
            info!("清空队列 {}，丢弃 {} 条消息", queue, purged);
        }
        Ok(())
    }
}
