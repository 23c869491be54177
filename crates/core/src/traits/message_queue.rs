use async_trait::async_trait;
use std::time::Duration;

use crate::{
    models::{QueueName, TaskMessage},
    SchedulerResult,
};

/// 优先级队列抽象接口
///
/// 调度器只负责给消息打上正确的队列标签并投递；Worker 按给定顺序消费，
/// 排在前面的队列有消息时永远先被取走。
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 发布消息到指定队列
    async fn publish_message(&self, queue: QueueName, message: &TaskMessage) -> SchedulerResult<()>;

    /// 按 `order` 给出的优先级顺序取出下一条消息
    async fn consume_next(&self, order: &[QueueName]) -> SchedulerResult<Option<TaskMessage>>;

    /// 等待新消息到达，最多等待 `timeout`
    async fn wait_for_message(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }

    /// 获取队列中的消息数量
    async fn get_queue_size(&self, queue: QueueName) -> SchedulerResult<u32>;

    /// 清空队列
    async fn purge_queue(&self, queue: QueueName) -> SchedulerResult<()>;
}
