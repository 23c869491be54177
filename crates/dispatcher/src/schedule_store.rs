use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use rand::Rng;
use tracing::{debug, warn};

use taskbeat_core::{
    config::BeatConfig,
    models::{ScheduleEntry, ScheduleOptions, ScheduleSnapshotItem, TaskDefinition},
    traits::TaskDefinitionRepository,
    SchedulerError, SchedulerResult, StructuredLogger,
};

use crate::router::TaskRouter;
use crate::schedule_matcher::CompiledSchedule;

/// 调度表中的一项：调度条目及其解析后的规则
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledTask {
    pub entry: ScheduleEntry,
    pub schedule: CompiledSchedule,
}

impl ScheduledTask {
    pub fn snapshot(&self, router: &TaskRouter, now: DateTime<Utc>) -> ScheduleSnapshotItem {
        let check = self.schedule.is_due(self.entry.last_run_at, now);
        ScheduleSnapshotItem {
            name: self.entry.name.clone(),
            target: self.entry.target.clone(),
            schedule: self.entry.schedule.describe(),
            queue: router.route_entry(&self.entry),
            due_in_seconds: if check.is_due { 0 } else { check.seconds_until_next },
            last_run_at: self.entry.last_run_at,
            run_count: self.entry.total_run_count,
        }
    }
}

/// 一次加载的结果
#[derive(Debug, Default)]
pub struct LoadedSchedule {
    pub tasks: Vec<ScheduledTask>,
    /// 因调度规则无效被跳过的任务
    pub skipped: Vec<SchedulerError>,
}

/// 调度存储适配器
///
/// 读取全部启用的任务定义并转换为调度条目，回写分发元数据。
/// 读写失败都会有限次重试，重试间隔指数增长并带随机抖动。
pub struct ScheduleStore {
    repo: Arc<dyn TaskDefinitionRepository>,
    retry_attempts: u32,
    retry_backoff: Duration,
    options: ScheduleOptions,
}

impl ScheduleStore {
    pub fn new(repo: Arc<dyn TaskDefinitionRepository>, config: &BeatConfig) -> Self {
        Self {
            repo,
            retry_attempts: config.store_retry_attempts.max(1),
            retry_backoff: Duration::from_millis(config.store_retry_backoff_ms),
            options: ScheduleOptions {
                expires_in_seconds: config.message_expiry_seconds,
            },
        }
    }

    /// 读取全部启用的任务定义
    ///
    /// 重试耗尽后返回 `ConfigLoad`。
    pub async fn load_enabled(&self) -> SchedulerResult<Vec<TaskDefinition>> {
        self.with_retry("load_enabled", move || self.repo.list_enabled())
            .await
            .map_err(|(attempts, e)| {
                counter!("taskbeat_refresh_failures_total").increment(1);
                SchedulerError::ConfigLoad(format!("{attempts}次尝试后仍失败: {e}"))
            })
    }

    /// 读取并解析调度表，调度规则无效的任务被跳过并记录日志
    pub async fn load_entries(&self) -> SchedulerResult<LoadedSchedule> {
        let definitions = self.load_enabled().await?;
        let mut loaded = LoadedSchedule::default();

        for definition in definitions {
            match CompiledSchedule::compile(&definition.schedule) {
                Ok(schedule) => loaded.tasks.push(ScheduledTask {
                    entry: ScheduleEntry::from_definition(&definition, self.options.clone()),
                    schedule,
                }),
                Err(e) => {
                    StructuredLogger::log_entry_skipped(&definition.name, &e.to_string());
                    loaded
                        .skipped
                        .push(SchedulerError::schedule_parse(&definition.name, e.to_string()));
                }
            }
        }

        Ok(loaded)
    }

    /// 回写一次分发的 `last_run_at`/`run_count`
    ///
    /// 重试耗尽后返回 `DispatchWrite`，调用方记录日志后继续。
    pub async fn record_dispatch(
        &self,
        name: &str,
        run_at: DateTime<Utc>,
        run_count: i64,
    ) -> SchedulerResult<()> {
        self.with_retry("record_dispatch", move || {
            self.repo.update_dispatch_metadata(name, run_at, run_count)
        })
        .await
        .map_err(|(attempts, e)| {
            StructuredLogger::log_dispatch_write_failed(name, attempts, &e);
            counter!("taskbeat_dispatch_write_failures_total").increment(1);
            SchedulerError::DispatchWrite {
                name: name.to_string(),
                message: e.to_string(),
            }
        })
    }

    /// 直接从存储计算调度快照，不依赖正在运行的调度器
    pub async fn snapshot(
        &self,
        router: &TaskRouter,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<ScheduleSnapshotItem>> {
        let loaded = self.load_entries().await?;
        Ok(loaded
            .tasks
            .iter()
            .map(|task| task.snapshot(router, now))
            .collect())
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        mut f: F,
    ) -> Result<T, (u32, SchedulerError)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SchedulerResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry_attempts && e.is_retryable() => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "存储操作 {} 第{}次失败: {}，{}ms后重试",
                        operation,
                        attempt,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    debug!("存储操作 {} 放弃重试: {}", operation, e);
                    return Err((attempt, e));
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry_backoff.as_millis() as u64;
        let exponential = base.saturating_mul(1u64 << (attempt - 1).min(10));
        let jitter = if base > 1 {
            rand::rng().random_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(exponential + jitter)
    }
}
