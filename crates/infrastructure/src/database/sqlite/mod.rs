pub mod sqlite_execution_record_repository;
pub mod sqlite_task_definition_repository;

pub use sqlite_execution_record_repository::SqliteExecutionRecordRepository;
pub use sqlite_task_definition_repository::SqliteTaskDefinitionRepository;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use taskbeat_core::config::DatabaseConfig;
use tracing::{debug, info};

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("无效的数据库URL: {}", config.url))?
            .create_if_missing(true);

        let pool = if config.is_in_memory() {
            // 内存库的生命周期跟随连接，连接不能被回收
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
                .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                .max_lifetime(Duration::from_secs(1800)) // 30分钟默认生命周期
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        info!("数据库连接池已创建: {}", config.url);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建表和索引，可重复执行
    pub async fn migrate(&self) -> Result<()> {
        run_migrations(&self.pool)
            .await
            .context("数据库迁移失败")
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub type DbPool = Pool<Sqlite>;

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    debug!("执行SQLite数据库迁移");

    // interval 与 cron 二者必居其一
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_definitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            target TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            interval_seconds INTEGER,
            cron_minute TEXT,
            cron_hour TEXT,
            cron_day_of_week TEXT,
            cron_day_of_month TEXT,
            cron_month_of_year TEXT,
            args TEXT NOT NULL DEFAULT '[]',
            kwargs TEXT NOT NULL DEFAULT '{}',
            extra_config TEXT NOT NULL DEFAULT '{}',
            last_run_at DATETIME,
            run_count INTEGER NOT NULL DEFAULT 0 CHECK (run_count >= 0),
            created_by TEXT,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK ((interval_seconds IS NOT NULL) + (cron_minute IS NOT NULL) = 1)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS execution_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            invocation_id TEXT NOT NULL UNIQUE,
            task_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING'
                CHECK (status IN ('PENDING', 'STARTED', 'SUCCESS', 'FAILURE', 'RETRY')),
            worker_id TEXT,
            start_time DATETIME,
            complete_time DATETIME,
            result TEXT,
            traceback TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            args TEXT NOT NULL DEFAULT '[]',
            kwargs TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_task_definitions_enabled ON task_definitions(enabled)",
        "CREATE INDEX IF NOT EXISTS idx_execution_records_task_name ON execution_records(task_name)",
        "CREATE INDEX IF NOT EXISTS idx_execution_records_status ON execution_records(status)",
        "CREATE INDEX IF NOT EXISTS idx_execution_records_created_at ON execution_records(created_at)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("SQLite数据库迁移完成");
    Ok(())
}
