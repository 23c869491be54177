use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metrics::counter;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskbeat_core::{traits::ExecutionRecordRepository, StructuredLogger};

use crate::execution_tracker::RecordCommand;

enum WriterMessage {
    Apply(RecordCommand),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct WriterStats {
    applied: AtomicU64,
    failed: AtomicU64,
}

/// 执行记录写入池
///
/// 固定数量的写入任务，各自消费一个有界通道。同一个 `invocation_id` 总是落到
/// 同一个分片，因此它的写入按提交顺序执行。通道满时 `submit` 会等待。
pub struct RecordWriter {
    shards: Mutex<Vec<mpsc::Sender<WriterMessage>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<WriterStats>,
    shard_count: usize,
}

impl RecordWriter {
    /// 启动 `workers` 个写入任务，每个通道容量为 `capacity`
    pub fn spawn(repo: Arc<dyn ExecutionRecordRepository>, workers: usize, capacity: usize) -> Self {
        let shard_count = workers.max(1);
        let stats = Arc::new(WriterStats::default());
        let mut shards = Vec::with_capacity(shard_count);
        let mut handles = Vec::with_capacity(shard_count);

        for shard in 0..shard_count {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            shards.push(tx);
            handles.push(tokio::spawn(run_shard(
                shard,
                repo.clone(),
                rx,
                stats.clone(),
            )));
        }

        info!("执行记录写入池已启动，{} 个写入任务", shard_count);
        Self {
            shards: Mutex::new(shards),
            handles: Mutex::new(handles),
            stats,
            shard_count,
        }
    }

    fn shard_for(&self, invocation_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        invocation_id.hash(&mut hasher);
        (hasher.finish() % self.shard_count as u64) as usize
    }

    /// 提交一次写入，通道满时等待
    pub async fn submit(&self, command: RecordCommand) {
        let shard = self.shard_for(command.invocation_id());
        let sender = self.shards.lock().await.get(shard).cloned();

        let Some(sender) = sender else {
            self.reject(&command, "写入池已关闭");
            return;
        };
        if let Err(mpsc::error::SendError(WriterMessage::Apply(command))) =
            sender.send(WriterMessage::Apply(command)).await
        {
            self.reject(&command, "写入任务已退出");
        }
    }

    fn reject(&self, command: &RecordCommand, reason: &str) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        counter!("taskbeat_record_write_failures_total").increment(1);
        warn!(
            "丢弃执行记录写入 {}({}): {}",
            command.hook_name(),
            command.invocation_id(),
            reason
        );
    }

    /// 等待此前提交的写入全部完成
    pub async fn flush(&self) {
        let senders: Vec<_> = self.shards.lock().await.clone();
        let mut waiters = Vec::with_capacity(senders.len());
        for sender in senders {
            let (tx, rx) = oneshot::channel();
            if sender.send(WriterMessage::Flush(tx)).await.is_ok() {
                waiters.push(rx);
            }
        }
        for waiter in waiters {
            let _ = waiter.await;
        }
    }

    /// 排空队列后停止所有写入任务，之后的提交会被丢弃
    pub async fn shutdown(&self) {
        let senders = std::mem::take(&mut *self.shards.lock().await);
        drop(senders);

        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("执行记录写入任务异常退出: {}", e);
            }
        }
        info!(
            "执行记录写入池已停止，成功 {} 次，失败 {} 次",
            self.applied(),
            self.failed()
        );
    }

    pub fn applied(&self) -> u64 {
        self.stats.applied.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }
}

async fn run_shard(
    shard: usize,
    repo: Arc<dyn ExecutionRecordRepository>,
    mut rx: mpsc::Receiver<WriterMessage>,
    stats: Arc<WriterStats>,
) {
    debug!("执行记录写入任务 {} 启动", shard);
    while let Some(message) = rx.recv().await {
        match message {
            WriterMessage::Apply(command) => match command.apply(repo.as_ref()).await {
                Ok(Some(record)) => {
                    stats.applied.fetch_add(1, Ordering::Relaxed);
                    StructuredLogger::log_execution_recorded(
                        &record.invocation_id,
                        &record.task_name,
                        record.status,
                        record.retry_count,
                    );
                }
                Ok(None) => {
                    stats.applied.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    counter!("taskbeat_record_write_failures_total").increment(1);
                    StructuredLogger::log_hook_failed(command.hook_name(), command.invocation_id(), &e);
                }
            },
            WriterMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("执行记录写入任务 {} 退出", shard);
}
