use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use taskbeat_core::{
    models::{ExecutionRecord, ExecutionRecordFilter},
    traits::ExecutionRecordRepository,
    SchedulerError, SchedulerResult,
};

use crate::error_handling::{RepositoryErrorHelpers, RepositoryOperation};

pub struct SqliteExecutionRecordRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn encode_json<T: serde::Serialize>(column: &str, value: &T) -> SchedulerResult<String> {
        serde_json::to_string(value)
            .map_err(|e| RepositoryErrorHelpers::json_column_error("execution_records", column, e))
    }

    fn decode_json<T: serde::de::DeserializeOwned>(column: &str, raw: &str) -> SchedulerResult<T> {
        serde_json::from_str(raw)
            .map_err(|e| RepositoryErrorHelpers::json_column_error("execution_records", column, e))
    }

    fn row_to_record(row: &SqliteRow) -> SchedulerResult<ExecutionRecord> {
        let result: Option<String> = row.try_get("result")?;
        let result = result
            .map(|raw| Self::decode_json::<Value>("result", &raw))
            .transpose()?;
        let args: Vec<Value> = Self::decode_json("args", &row.try_get::<String, _>("args")?)?;
        let kwargs: Map<String, Value> =
            Self::decode_json("kwargs", &row.try_get::<String, _>("kwargs")?)?;

        Ok(ExecutionRecord {
            id: row.try_get("id")?,
            invocation_id: row.try_get("invocation_id")?,
            task_name: row.try_get("task_name")?,
            status: row.try_get("status")?,
            worker_id: row.try_get("worker_id")?,
            start_time: row.try_get("start_time")?,
            complete_time: row.try_get("complete_time")?,
            result,
            traceback: row.try_get("traceback")?,
            retry_count: row.try_get("retry_count")?,
            args,
            kwargs,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ExecutionRecordRepository for SqliteExecutionRecordRepository {
    #[instrument(skip(self, record), fields(task.invocation_id = %record.invocation_id))]
    async fn create(&self, record: &ExecutionRecord) -> SchedulerResult<ExecutionRecord> {
        let result_json = record
            .result
            .as_ref()
            .map(|value| Self::encode_json("result", value))
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO execution_records (
                invocation_id, task_name, status, worker_id, start_time, complete_time,
                result, traceback, retry_count, args, kwargs, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.invocation_id)
        .bind(&record.task_name)
        .bind(record.status)
        .bind(&record.worker_id)
        .bind(record.start_time)
        .bind(record.complete_time)
        .bind(result_json)
        .bind(&record.traceback)
        .bind(record.retry_count)
        .bind(Self::encode_json("args", &record.args)?)
        .bind(Self::encode_json("kwargs", &record.kwargs)?)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::execution_record_error(
                RepositoryOperation::Create,
                &record.invocation_id,
                e,
            )
        })?;

        let mut created = record.clone();
        created.id = result.last_insert_rowid();
        debug!("创建执行记录成功: {} ({})", created.invocation_id, created.status);
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_by_invocation_id(
        &self,
        invocation_id: &str,
    ) -> SchedulerResult<Option<ExecutionRecord>> {
        let row = sqlx::query("SELECT * FROM execution_records WHERE invocation_id = ?")
            .bind(invocation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::execution_record_error(RepositoryOperation::Read, invocation_id, e)
            })?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    #[instrument(skip(self, record), fields(task.invocation_id = %record.invocation_id))]
    async fn update(&self, record: &ExecutionRecord) -> SchedulerResult<()> {
        let result_json = record
            .result
            .as_ref()
            .map(|value| Self::encode_json("result", value))
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE execution_records
            SET status = ?, worker_id = ?, start_time = ?, complete_time = ?,
                result = ?, traceback = ?, retry_count = ?, updated_at = ?
            WHERE invocation_id = ?
            "#,
        )
        .bind(record.status)
        .bind(&record.worker_id)
        .bind(record.start_time)
        .bind(record.complete_time)
        .bind(result_json)
        .bind(&record.traceback)
        .bind(record.retry_count)
        .bind(record.updated_at)
        .bind(&record.invocation_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::execution_record_error(
                RepositoryOperation::Update,
                &record.invocation_id,
                e,
            )
        })?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::ExecutionRecordNotFound {
                invocation_id: record.invocation_id.clone(),
            });
        }

        debug!("更新执行记录成功: {} -> {}", record.invocation_id, record.status);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &ExecutionRecordFilter) -> SchedulerResult<Vec<ExecutionRecord>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM execution_records WHERE 1 = 1");

        if let Some(task_name) = &filter.task_name {
            query.push(" AND task_name = ").push_bind(task_name);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status);
        }

        query.push(" ORDER BY created_at DESC, id DESC");

        // SQLite 的 OFFSET 必须跟在 LIMIT 之后，-1 表示不限
        query
            .push(" LIMIT ")
            .push_bind(filter.limit.unwrap_or(-1))
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0));

        let rows = query.build().fetch_all(&self.pool).await.map_err(|e| {
            RepositoryErrorHelpers::execution_record_error(RepositoryOperation::Query, "*", e)
        })?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
