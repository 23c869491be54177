use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::{error, info};

use taskbeat_core::{
    config::AppConfig,
    models::TaskMessage,
    traits::{Clock, SystemClock, TaskDefinitionRepository},
    SchedulerError,
};
use taskbeat_dispatcher::{BeatScheduler, ScheduleStore, TaskRouter};
use taskbeat_infrastructure::{
    DatabaseManager, PriorityQueueFabric, SqliteExecutionRecordRepository,
    SqliteTaskDefinitionRepository,
};
use taskbeat_worker::{ExecutionTracker, HandlerRegistry, RecordWriter, TaskError, WorkerService};

use crate::shutdown::ShutdownManager;

/// 主应用程序
///
/// 持有数据库、进程内优先级队列和执行记录写入池，在同一进程中运行 Beat 调度器与 Worker。
pub struct Application {
    config: AppConfig,
    db: DatabaseManager,
    task_repo: Arc<SqliteTaskDefinitionRepository>,
    queue: Arc<PriorityQueueFabric>,
    writer: Arc<RecordWriter>,
    tracker: Arc<ExecutionTracker>,
    clock: Arc<dyn Clock>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序");

        // 优先级队列只在进程内共享，Beat 与 Worker 必须在同一进程中运行
        if !config.beat.enabled || !config.worker.enabled {
            return Err(anyhow::anyhow!(
                "Beat 与 Worker 必须同时启用 (beat.enabled={}, worker.enabled={})，队列不跨进程共享",
                config.beat.enabled,
                config.worker.enabled
            ));
        }

        let db = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        db.migrate().await?;

        let task_repo = Arc::new(SqliteTaskDefinitionRepository::new(db.pool().clone()));
        let record_repo = Arc::new(SqliteExecutionRecordRepository::new(db.pool().clone()));
        let queue = Arc::new(PriorityQueueFabric::with_config(config.queue.clone()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let writer = Arc::new(RecordWriter::spawn(
            record_repo,
            config.worker.record_writer_workers,
            config.worker.record_writer_capacity,
        ));
        let tracker = Arc::new(ExecutionTracker::new(
            writer.clone(),
            clock.clone(),
            config.worker.skip_task_prefixes.clone(),
        ));

        let app = Self {
            config,
            db,
            task_repo,
            queue,
            writer,
            tracker,
            clock,
        };
        app.seed_tasks().await?;
        Ok(app)
    }

    /// 注册配置文件中的种子任务，已存在的同名任务保持不变
    pub async fn seed_tasks(&self) -> Result<usize> {
        let mut created = 0;
        for seed in &self.config.tasks {
            let definition = seed.to_definition()?;
            match self.task_repo.create(&definition).await {
                Ok(_) => {
                    info!("注册种子任务: {} ({})", definition.name, definition.schedule.describe());
                    created += 1;
                }
                Err(SchedulerError::DuplicateTaskName { .. }) => {
                    info!("种子任务 {} 已存在，跳过", definition.name);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("注册种子任务失败: {}", definition.name));
                }
            }
        }
        Ok(created)
    }

    fn build_scheduler(&self) -> BeatScheduler {
        let store = ScheduleStore::new(self.task_repo.clone(), &self.config.beat);
        BeatScheduler::new(
            self.clock.clone(),
            store,
            TaskRouter::new(&self.config.router),
            self.queue.clone(),
            self.config.beat.clone(),
        )
        .with_hooks(self.tracker.clone())
    }

    fn build_worker(&self) -> WorkerService {
        WorkerService::new(
            self.config.worker.clone(),
            self.queue.clone(),
            Arc::new(builtin_handlers(self.db.pool().clone())),
            self.tracker.clone(),
            self.clock.clone(),
        )
    }

    /// 启动 Beat 调度器和 Worker，收到关闭信号后等待它们退出并排空写入池
    pub async fn run(&self, shutdown: ShutdownManager) -> Result<()> {
        let mut scheduler = self.build_scheduler();
        let beat_rx = shutdown.subscribe().await;
        let worker = self.build_worker();
        let worker_rx = shutdown.subscribe().await;

        let handles: Vec<(&str, JoinHandle<Result<(), SchedulerError>>)> = vec![
            ("beat", tokio::spawn(async move { scheduler.run(beat_rx).await })),
            ("worker", tokio::spawn(async move { worker.run(worker_rx).await })),
        ];

        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(())) => info!("组件 {} 已退出", name),
                Ok(Err(e)) => error!("组件 {} 运行失败: {}", name, e),
                Err(e) => error!("组件 {} 异常退出: {}", name, e),
            }
        }

        self.writer.shutdown().await;
        self.db.close().await;
        Ok(())
    }
}

/// 内置的任务处理器
pub fn builtin_handlers(pool: SqlitePool) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register_fn("system.health_check", move |_message: TaskMessage| {
        let pool = pool.clone();
        async move {
            match sqlx::query("SELECT 1").execute(&pool).await {
                Ok(_) => Ok(json!({"status": "ok"})),
                Err(e) => Err(TaskError::failed(format!("数据库健康检查失败: {e}"))),
            }
        }
    });

    registry.register_fn("builtin.echo", |message: TaskMessage| async move {
        Ok::<Value, TaskError>(json!({
            "args": Value::Array(message.args),
            "kwargs": Value::Object(message.kwargs),
        }))
    });

    registry
}
