use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument, warn};

use taskbeat_core::{
    models::{CronFields, ExtraConfig, ScheduleKind, TaskDefinition},
    traits::TaskDefinitionRepository,
    SchedulerError, SchedulerResult,
};

use crate::error_handling::{RepositoryErrorHelpers, RepositoryOperation};

const SELECT_COLUMNS: &str = r#"
    SELECT id, name, target, enabled, interval_seconds,
           cron_minute, cron_hour, cron_day_of_week, cron_day_of_month, cron_month_of_year,
           args, kwargs, extra_config, last_run_at, run_count, created_by, created_at, updated_at
    FROM task_definitions
"#;

/// 任务定义在表中的调度列
struct ScheduleColumns {
    interval_seconds: Option<i64>,
    cron: Option<CronFields>,
}

impl ScheduleColumns {
    fn from_schedule(schedule: &ScheduleKind) -> Self {
        match schedule {
            ScheduleKind::Interval { seconds } => Self {
                interval_seconds: Some(*seconds as i64),
                cron: None,
            },
            ScheduleKind::Cron(fields) => Self {
                interval_seconds: None,
                cron: Some(fields.clone()),
            },
        }
    }

    fn cron_column(&self, pick: fn(&CronFields) -> &String) -> Option<String> {
        self.cron.as_ref().map(|fields| pick(fields).clone())
    }
}

pub struct SqliteTaskDefinitionRepository {
    pool: SqlitePool,
}

impl SqliteTaskDefinitionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn encode_json<T: serde::Serialize>(column: &str, value: &T) -> SchedulerResult<String> {
        serde_json::to_string(value)
            .map_err(|e| RepositoryErrorHelpers::json_column_error("task_definitions", column, e))
    }

    fn decode_json<T: serde::de::DeserializeOwned>(column: &str, raw: &str) -> SchedulerResult<T> {
        serde_json::from_str(raw)
            .map_err(|e| RepositoryErrorHelpers::json_column_error("task_definitions", column, e))
    }

    fn row_to_task_definition(row: &SqliteRow) -> SchedulerResult<TaskDefinition> {
        let name: String = row.try_get("name")?;
        let interval_seconds: Option<i64> = row.try_get("interval_seconds")?;
        let cron_minute: Option<String> = row.try_get("cron_minute")?;

        let schedule = match (interval_seconds, cron_minute) {
            (Some(seconds), None) if seconds > 0 => ScheduleKind::Interval {
                seconds: seconds as u64,
            },
            (Some(seconds), None) => {
                return Err(SchedulerError::schedule_parse(
                    &name,
                    format!("interval必须为正数: {seconds}"),
                ))
            }
            (None, Some(minute)) => {
                let field = |column: &str| -> SchedulerResult<String> {
                    let value: Option<String> = row.try_get(column)?;
                    Ok(value.unwrap_or_else(|| "*".to_string()))
                };
                ScheduleKind::Cron(CronFields {
                    minute,
                    hour: field("cron_hour")?,
                    day_of_week: field("cron_day_of_week")?,
                    day_of_month: field("cron_day_of_month")?,
                    month_of_year: field("cron_month_of_year")?,
                })
            }
            _ => {
                return Err(SchedulerError::schedule_parse(
                    &name,
                    "interval与cron必须且只能设置一个",
                ))
            }
        };

        let args: Vec<Value> = Self::decode_json("args", &row.try_get::<String, _>("args")?)?;
        let kwargs: Map<String, Value> =
            Self::decode_json("kwargs", &row.try_get::<String, _>("kwargs")?)?;
        let extra_config: ExtraConfig =
            Self::decode_json("extra_config", &row.try_get::<String, _>("extra_config")?)?;

        Ok(TaskDefinition {
            id: row.try_get("id")?,
            name,
            target: row.try_get("target")?,
            enabled: row.try_get("enabled")?,
            schedule,
            args,
            kwargs,
            extra_config,
            last_run_at: row.try_get("last_run_at")?,
            run_count: row.try_get("run_count")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskDefinitionRepository for SqliteTaskDefinitionRepository {
    #[instrument(skip(self, task), fields(task.name = %task.name))]
    async fn create(&self, task: &TaskDefinition) -> SchedulerResult<TaskDefinition> {
        let columns = ScheduleColumns::from_schedule(&task.schedule);
        let args = Self::encode_json("args", &task.args)?;
        let kwargs = Self::encode_json("kwargs", &task.kwargs)?;
        let extra_config = Self::encode_json("extra_config", &task.extra_config)?;

        let result = sqlx::query(
            r#"
            INSERT INTO task_definitions (
                name, target, enabled, interval_seconds,
                cron_minute, cron_hour, cron_day_of_week, cron_day_of_month, cron_month_of_year,
                args, kwargs, extra_config, last_run_at, run_count, created_by, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.name)
        .bind(&task.target)
        .bind(task.enabled)
        .bind(columns.interval_seconds)
        .bind(columns.cron_column(|c| &c.minute))
        .bind(columns.cron_column(|c| &c.hour))
        .bind(columns.cron_column(|c| &c.day_of_week))
        .bind(columns.cron_column(|c| &c.day_of_month))
        .bind(columns.cron_column(|c| &c.month_of_year))
        .bind(args)
        .bind(kwargs)
        .bind(extra_config)
        .bind(task.last_run_at)
        .bind(task.run_count)
        .bind(&task.created_by)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::task_definition_error(RepositoryOperation::Create, &task.name, e))?;

        let mut created = task.clone();
        created.id = result.last_insert_rowid();
        debug!("创建任务定义成功: {} (ID: {})", created.name, created.id);
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_by_name(&self, name: &str) -> SchedulerResult<Option<TaskDefinition>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE name = ?"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::task_definition_error(RepositoryOperation::Read, name, e))?;

        row.as_ref().map(Self::row_to_task_definition).transpose()
    }

    #[instrument(skip(self, task), fields(task.name = %task.name))]
    async fn update(&self, task: &TaskDefinition) -> SchedulerResult<()> {
        let columns = ScheduleColumns::from_schedule(&task.schedule);
        let args = Self::encode_json("args", &task.args)?;
        let kwargs = Self::encode_json("kwargs", &task.kwargs)?;
        let extra_config = Self::encode_json("extra_config", &task.extra_config)?;

        let result = sqlx::query(
            r#"
            UPDATE task_definitions
            SET target = ?, enabled = ?, interval_seconds = ?,
                cron_minute = ?, cron_hour = ?, cron_day_of_week = ?,
                cron_day_of_month = ?, cron_month_of_year = ?,
                args = ?, kwargs = ?, extra_config = ?, updated_at = ?
            WHERE name = ?
            "#,
        )
        .bind(&task.target)
        .bind(task.enabled)
        .bind(columns.interval_seconds)
        .bind(columns.cron_column(|c| &c.minute))
        .bind(columns.cron_column(|c| &c.hour))
        .bind(columns.cron_column(|c| &c.day_of_week))
        .bind(columns.cron_column(|c| &c.day_of_month))
        .bind(columns.cron_column(|c| &c.month_of_year))
        .bind(args)
        .bind(kwargs)
        .bind(extra_config)
        .bind(Utc::now())
        .bind(&task.name)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::task_definition_error(RepositoryOperation::Update, &task.name, e))?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound {
                name: task.name.clone(),
            });
        }

        debug!("更新任务定义成功: {}", task.name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_enabled(&self, name: &str, enabled: bool) -> SchedulerResult<()> {
        let result = sqlx::query("UPDATE task_definitions SET enabled = ?, updated_at = ? WHERE name = ?")
            .bind(enabled)
            .bind(Utc::now())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::task_definition_error(RepositoryOperation::Update, name, e))?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> SchedulerResult<()> {
        let result = sqlx::query("DELETE FROM task_definitions WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::task_definition_error(RepositoryOperation::Delete, name, e))?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound {
                name: name.to_string(),
            });
        }

        debug!("删除任务定义成功: {}", name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_enabled(&self) -> SchedulerResult<Vec<TaskDefinition>> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} WHERE enabled = 1 ORDER BY name"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::task_definition_error(RepositoryOperation::Query, "*", e)
            })?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::row_to_task_definition(row) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    let name: String = row.try_get("name").unwrap_or_default();
                    warn!("跳过无法解码的任务定义 '{}': {}", name, e);
                }
            }
        }

        debug!("查询到 {} 个启用的任务定义", tasks.len());
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn update_dispatch_metadata(
        &self,
        name: &str,
        last_run_at: DateTime<Utc>,
        run_count: i64,
    ) -> SchedulerResult<()> {
        // 旧值不能覆盖新值
        let result = sqlx::query(
            r#"
            UPDATE task_definitions
            SET last_run_at = CASE
                    WHEN last_run_at IS NULL OR julianday(last_run_at) < julianday(?) THEN ?
                    ELSE last_run_at
                END,
                run_count = MAX(run_count, ?)
            WHERE name = ?
            "#,
        )
        .bind(last_run_at)
        .bind(last_run_at)
        .bind(run_count)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::task_definition_error(RepositoryOperation::Update, name, e))?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}
