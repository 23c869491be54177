use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use taskbeat_core::{
    config::AppConfig,
    models::{ExecutionRecord, ExecutionRecordFilter, ExecutionStatus, ScheduleSnapshotItem},
    traits::ExecutionRecordRepository,
};
use taskbeat_dispatcher::{ScheduleStore, TaskRouter};
use taskbeat_infrastructure::{
    DatabaseManager, SqliteExecutionRecordRepository, SqliteTaskDefinitionRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = CliApp::parse();
    cli.run().await
}

/// CLI应用程序主结构
#[derive(Parser, Debug)]
#[command(name = "taskbeat-cli")]
#[command(version = "1.0.0")]
#[command(about = "taskbeat 运维查询工具")]
#[command(long_about = "只读地查看调度快照和执行记录，不会修改数据库")]
struct CliApp {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径，不指定时依次查找默认位置
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 查看当前调度快照
    Schedule {
        /// 以JSON格式输出
        #[arg(long)]
        json: bool,
    },
    /// 查询执行记录
    Executions {
        /// 按任务名称过滤
        #[arg(short, long)]
        name: Option<String>,
        /// 按状态过滤 (PENDING, STARTED, SUCCESS, FAILURE, RETRY)
        #[arg(short, long, value_parser = parse_status)]
        status: Option<ExecutionStatus>,
        /// 返回数量
        #[arg(short, long, default_value = "20")]
        limit: i64,
        /// 偏移量
        #[arg(short, long, default_value = "0")]
        offset: i64,
        /// 以JSON格式输出
        #[arg(long)]
        json: bool,
    },
}

fn parse_status(s: &str) -> Result<ExecutionStatus, String> {
    s.parse().map_err(|e: taskbeat_core::SchedulerError| e.to_string())
}

impl CliApp {
    async fn run(self) -> Result<()> {
        let config = AppConfig::load(self.config.as_deref()).context("加载配置失败")?;
        let db = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;

        let outcome = match self.command {
            Commands::Schedule { json } => show_schedule(&db, &config, json).await,
            Commands::Executions {
                name,
                status,
                limit,
                offset,
                json,
            } => {
                let filter = ExecutionRecordFilter {
                    task_name: name,
                    status,
                    limit: Some(limit),
                    offset: Some(offset),
                };
                show_executions(&db, filter, json).await
            }
        };

        db.close().await;
        outcome
    }
}

async fn show_schedule(db: &DatabaseManager, config: &AppConfig, json: bool) -> Result<()> {
    let repo = Arc::new(SqliteTaskDefinitionRepository::new(db.pool().clone()));
    let store = ScheduleStore::new(repo, &config.beat);
    let router = TaskRouter::new(&config.router);
    let items = store
        .snapshot(&router, Utc::now())
        .await
        .context("读取调度快照失败")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("没有启用的任务");
        return Ok(());
    }
    print_schedule_table(&items);
    Ok(())
}

fn print_schedule_table(items: &[ScheduleSnapshotItem]) {
    println!(
        "{:<30} {:<30} {:<28} {:<14} {:>10} {:>8}  {}",
        "名称", "目标", "调度", "队列", "距下次(秒)", "次数", "上次运行"
    );
    for item in items {
        println!(
            "{:<30} {:<30} {:<28} {:<14} {:>10} {:>8}  {}",
            item.name,
            item.target,
            item.schedule,
            item.queue.as_str(),
            item.due_in_seconds,
            item.run_count,
            format_time(item.last_run_at),
        );
    }
}

async fn show_executions(db: &DatabaseManager, filter: ExecutionRecordFilter, json: bool) -> Result<()> {
    let repo = SqliteExecutionRecordRepository::new(db.pool().clone());
    let records = repo.list(&filter).await.context("查询执行记录失败")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("没有匹配的执行记录");
        return Ok(());
    }
    print_execution_table(&records);
    Ok(())
}

fn print_execution_table(records: &[ExecutionRecord]) {
    println!(
        "{:<38} {:<30} {:<8} {:>5} {:<20} {:<20}  {}",
        "调用ID", "任务", "状态", "重试", "开始时间", "完成时间", "Worker"
    );
    for record in records {
        println!(
            "{:<38} {:<30} {:<8} {:>5} {:<20} {:<20}  {}",
            record.invocation_id,
            record.task_name,
            record.status.as_str(),
            record.retry_count,
            format_time(record.start_time),
            format_time(record.complete_time),
            record.worker_id.as_deref().unwrap_or("-"),
        );
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
