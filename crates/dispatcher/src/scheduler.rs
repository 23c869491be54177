use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use taskbeat_core::{
    config::BeatConfig,
    models::{ScheduleEntry, ScheduleSnapshotItem, TaskMessage},
    traits::{Clock, MessageQueue, TaskExecutionHooks},
    SchedulerResult, StructuredLogger,
};

use crate::router::TaskRouter;
use crate::schedule_store::{ScheduleStore, ScheduledTask};

/// 一次 tick 的结果
#[derive(Debug, Clone)]
pub struct TickReport {
    /// 本次成功投递的消息
    pub dispatched: Vec<TaskMessage>,
    /// 投递失败、留待下次 tick 重试的任务
    pub failed: Vec<String>,
    /// 下一次 tick 前的休眠时间
    pub sleep: Duration,
}

/// Beat 调度器
///
/// 持有内存中的调度表和上次刷新时间。`tick` 与 `refresh` 都需要 `&mut self`，
/// 因此同一进程内二者不会并发执行。调度器必须是单例：两个实例同时运行会重复分发任务。
pub struct BeatScheduler {
    clock: Arc<dyn Clock>,
    store: ScheduleStore,
    router: TaskRouter,
    queue: Arc<dyn MessageQueue>,
    hooks: Option<Arc<dyn TaskExecutionHooks>>,
    config: BeatConfig,
    schedule: BTreeMap<String, ScheduledTask>,
    last_refresh: Option<DateTime<Utc>>,
    snapshot_tx: watch::Sender<Vec<ScheduleSnapshotItem>>,
}

impl BeatScheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        store: ScheduleStore,
        router: TaskRouter,
        queue: Arc<dyn MessageQueue>,
        config: BeatConfig,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(Vec::new());
        Self {
            clock,
            store,
            router,
            queue,
            hooks: None,
            config,
            schedule: BTreeMap::new(),
            last_refresh: None,
            snapshot_tx,
        }
    }

    /// 设置分发观察钩子，每次投递成功后调用 `on_dispatch`
    pub fn with_hooks(mut self, hooks: Arc<dyn TaskExecutionHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// 订阅调度快照，每次刷新或 tick 后更新
    pub fn subscribe(&self) -> watch::Receiver<Vec<ScheduleSnapshotItem>> {
        self.snapshot_tx.subscribe()
    }

    pub fn entry(&self, name: &str) -> Option<&ScheduleEntry> {
        self.schedule.get(name).map(|task| &task.entry)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.schedule.values().map(|task| &task.entry)
    }

    pub fn len(&self) -> usize {
        self.schedule.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }

    /// 当前调度表的快照
    pub fn snapshot(&self) -> Vec<ScheduleSnapshotItem> {
        let now = self.clock.now();
        self.schedule
            .values()
            .map(|task| task.snapshot(&self.router, now))
            .collect()
    }

    pub fn refresh_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_refresh {
            None => true,
            Some(last) => (now - last).num_milliseconds() >= self.refresh_interval_ms(),
        }
    }

    fn refresh_interval_ms(&self) -> i64 {
        (self.config.refresh_interval_seconds as i64).saturating_mul(1000)
    }

    fn time_until_refresh(&self, now: DateTime<Utc>) -> Duration {
        match self.last_refresh {
            None => Duration::ZERO,
            Some(last) => {
                let remaining = self.refresh_interval_ms() - (now - last).num_milliseconds();
                Duration::from_millis(remaining.max(0) as u64)
            }
        }
    }

    /// 从存储整体重建调度表
    ///
    /// 失败时保留旧的调度表，并在下一个刷新窗口重试。重建时
    /// `last_run_at`/`total_run_count` 不会比本进程已分发的值更旧。
    pub async fn refresh(&mut self) -> SchedulerResult<usize> {
        let started = Instant::now();
        let now = self.clock.now();
        self.last_refresh = Some(now);

        let loaded = match self.store.load_entries().await {
            Ok(loaded) => loaded,
            Err(e) => {
                StructuredLogger::log_schedule_refresh_failed(self.config.store_retry_attempts, &e);
                return Err(e);
            }
        };

        let mut schedule = BTreeMap::new();
        for mut task in loaded.tasks {
            if let Some(previous) = self.schedule.get(&task.entry.name) {
                carry_forward(&mut task.entry, &previous.entry);
            }
            schedule.insert(task.entry.name.clone(), task);
        }

        for name in self.schedule.keys().filter(|name| !schedule.contains_key(*name)) {
            debug!("任务 {} 已从调度表移除", name);
        }

        self.schedule = schedule;
        StructuredLogger::log_schedule_refreshed(
            self.schedule.len(),
            loaded.skipped.len(),
            started.elapsed().as_millis() as u64,
        );
        self.publish_snapshot();
        Ok(self.schedule.len())
    }

    /// 分发所有到期的调度项，返回下一次 tick 前应休眠的时间
    pub async fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        let now = self.clock.now();
        let mut dispatched = Vec::new();
        let mut failed = Vec::new();
        let mut min_remaining: Option<u64> = None;

        let names: Vec<String> = self.schedule.keys().cloned().collect();
        for name in names {
            let Some(task) = self.schedule.get_mut(&name) else {
                continue;
            };

            let check = task.schedule.is_due(task.entry.last_run_at, now);
            if !check.is_due {
                min_remaining = Some(min_remaining.map_or(check.seconds_until_next, |m| {
                    m.min(check.seconds_until_next)
                }));
                continue;
            }

            let queue = self.router.route_entry(&task.entry);
            let message = TaskMessage::from_entry(&task.entry, queue, now);

            if let Err(e) = self.queue.publish_message(queue, &message).await {
                StructuredLogger::log_dispatch_failed(&name, queue, &e);
                counter!("taskbeat_dispatch_failures_total", "queue" => queue.as_str()).increment(1);
                failed.push(name);
                min_remaining = Some(0);
                continue;
            }

            task.entry.mark_dispatched(now);
            StructuredLogger::log_task_dispatched(&name, &message.invocation_id, queue, now);
            counter!("taskbeat_dispatch_total", "queue" => queue.as_str()).increment(1);

            if let Some(hooks) = &self.hooks {
                hooks.on_dispatch(&message).await;
            }

            // 写入失败不影响分发，错误已在存储适配器中记录
            let _ = self
                .store
                .record_dispatch(&name, now, task.entry.total_run_count)
                .await;

            let next = task.schedule.is_due(task.entry.last_run_at, now);
            min_remaining = Some(min_remaining.map_or(next.seconds_until_next, |m| {
                m.min(next.seconds_until_next)
            }));
            dispatched.push(message);
        }

        let sleep = self.compute_sleep(min_remaining, now);
        histogram!("taskbeat_tick_duration_seconds").record(started.elapsed().as_secs_f64());
        if !dispatched.is_empty() {
            info!("本次tick分发了 {} 个任务", dispatched.len());
        }
        debug!("下一次tick在 {}ms 后", sleep.as_millis());
        self.publish_snapshot();

        TickReport {
            dispatched,
            failed,
            sleep,
        }
    }

    fn compute_sleep(&self, min_remaining: Option<u64>, now: DateTime<Utc>) -> Duration {
        let min_sleep = self.config.min_sleep();
        let max_sleep = self.config.max_sleep().max(min_sleep);

        let sleep = min_remaining
            .map(Duration::from_secs)
            .unwrap_or(max_sleep)
            .clamp(min_sleep, max_sleep);

        sleep.min(self.time_until_refresh(now).max(min_sleep))
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    /// 运行调度循环直到收到关闭信号
    ///
    /// 启动后先完整刷新一次，然后交替执行 tick 与休眠。
    pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> SchedulerResult<()> {
        info!(
            "Beat调度器启动，刷新间隔 {}s",
            self.config.refresh_interval_seconds
        );

        loop {
            if self.refresh_due(self.clock.now()) {
                if let Err(e) = self.refresh().await {
                    warn!("调度表刷新失败，继续使用 {} 个旧调度项: {}", self.len(), e);
                }
            }

            let report = self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(report.sleep) => {}
                _ = shutdown_rx.recv() => {
                    info!("Beat调度器收到关闭信号");
                    break;
                }
            }
        }

        info!("Beat调度器已停止");
        Ok(())
    }
}

fn carry_forward(entry: &mut ScheduleEntry, previous: &ScheduleEntry) {
    if let Some(previous_run) = previous.last_run_at {
        if entry.last_run_at.map_or(true, |stored| stored < previous_run) {
            entry.last_run_at = Some(previous_run);
        }
    }
    entry.total_run_count = entry.total_run_count.max(previous.total_run_count);
}
