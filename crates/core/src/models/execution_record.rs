use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::errors::SchedulerError;
use crate::SchedulerResult;

/// 执行记录
///
/// 以 `invocation_id` 唯一标识一次任务调用（含其重试链），由执行追踪器创建和更新，
/// 本子系统从不删除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub invocation_id: String,
    pub task_name: String,
    pub status: ExecutionStatus,
    pub worker_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub complete_time: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub traceback: Option<String>,
    pub retry_count: i32,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 执行状态
///
/// 合法转换：`PENDING → STARTED → {SUCCESS, FAILURE, RETRY}`，`RETRY → STARTED`。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
    #[serde(rename = "RETRY")]
    Retry,
}

/// 开始一次执行尝试的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// PENDING 记录的首次执行
    FirstAttempt,
    /// STARTED/RETRY 记录的再次执行，retry_count 已加一
    Retried,
    /// 记录已结束，重复投递被忽略
    AlreadyFinished,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Started => "STARTED",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failure => "FAILURE",
            ExecutionStatus::Retry => "RETRY",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::Failure)
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Started)
                | (Started, Started)
                | (Started, Success)
                | (Started, Failure)
                | (Started, Retry)
                | (Retry, Started)
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ExecutionStatus::Pending),
            "STARTED" => Ok(ExecutionStatus::Started),
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILURE" => Ok(ExecutionStatus::Failure),
            "RETRY" => Ok(ExecutionStatus::Retry),
            _ => Err(SchedulerError::Configuration(format!("无效的执行状态: {s}"))),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for ExecutionStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ExecutionStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s.parse::<ExecutionStatus>() {
            Ok(status) => Ok(status),
            Err(_) => Err(format!("Invalid execution status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ExecutionStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 执行记录过滤器
#[derive(Debug, Clone, Default)]
pub struct ExecutionRecordFilter {
    pub task_name: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ExecutionRecord {
    fn base(
        invocation_id: &str,
        task_name: &str,
        status: ExecutionStatus,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0, // 将由数据库生成
            invocation_id: invocation_id.to_string(),
            task_name: task_name.to_string(),
            status,
            worker_id: None,
            start_time: None,
            complete_time: None,
            result: None,
            traceback: None,
            retry_count: 0,
            args,
            kwargs,
            created_at: now,
            updated_at: now,
        }
    }

    /// 分发时创建的 PENDING 记录
    pub fn pending(
        invocation_id: &str,
        task_name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::base(invocation_id, task_name, ExecutionStatus::Pending, args, kwargs, now)
    }

    /// 没有分发记录时由 pre-run 直接创建的 STARTED 记录
    pub fn started(
        invocation_id: &str,
        task_name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = Self::base(invocation_id, task_name, ExecutionStatus::Started, args, kwargs, now);
        record.start_time = Some(now);
        record
    }

    /// 开始一次执行尝试
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> AttemptOutcome {
        let outcome = match self.status {
            ExecutionStatus::Pending => AttemptOutcome::FirstAttempt,
            ExecutionStatus::Started | ExecutionStatus::Retry => {
                self.retry_count += 1;
                AttemptOutcome::Retried
            }
            ExecutionStatus::Success | ExecutionStatus::Failure => {
                return AttemptOutcome::AlreadyFinished;
            }
        };
        self.status = ExecutionStatus::Started;
        self.start_time = Some(now);
        self.complete_time = None;
        self.updated_at = now;
        outcome
    }

    /// 把停在 RETRY 的记录放回 STARTED，不计入重试次数
    ///
    /// 用于请求重试之后没能重新投递、需要就地结束本次尝试的情况。
    pub fn resume_attempt(&mut self, now: DateTime<Utc>) {
        if self.status == ExecutionStatus::Retry {
            self.status = ExecutionStatus::Started;
            self.complete_time = None;
            self.updated_at = now;
        }
    }

    /// 记录执行结束状态（SUCCESS/FAILURE/RETRY）
    ///
    /// 对同一终态的重复调用返回 `Ok(false)`，不修改记录。
    pub fn finish(
        &mut self,
        state: ExecutionStatus,
        result: Option<Value>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        if !matches!(
            state,
            ExecutionStatus::Success | ExecutionStatus::Failure | ExecutionStatus::Retry
        ) {
            return Err(SchedulerError::InvalidStatusTransition {
                from: self.status,
                to: state,
            });
        }
        if self.status == state && state.is_terminal() {
            return Ok(false);
        }
        if !self.status.can_transition_to(state) {
            return Err(SchedulerError::InvalidStatusTransition {
                from: self.status,
                to: state,
            });
        }

        self.status = state;
        if result.is_some() {
            self.result = result;
        }
        self.complete_time = Some(now);
        self.updated_at = now;
        Ok(true)
    }

    /// 记录失败及其回溯信息
    pub fn fail(&mut self, traceback: String, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let changed = self.finish(ExecutionStatus::Failure, None, now)?;
        if changed {
            self.traceback = Some(traceback);
        }
        Ok(changed)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn execution_duration_ms(&self) -> Option<i64> {
        if let (Some(started), Some(completed)) = (self.start_time, self.complete_time) {
            Some((completed - started).num_milliseconds())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ExecutionRecord {
        ExecutionRecord::pending("inv-1", "report", vec![json!(1)], Map::new(), Utc::now())
    }

    #[test]
    fn test_first_attempt_does_not_count_as_retry() {
        let mut record = record();
        assert_eq!(record.begin_attempt(Utc::now()), AttemptOutcome::FirstAttempt);
        assert_eq!(record.status, ExecutionStatus::Started);
        assert_eq!(record.retry_count, 0);
        assert!(record.start_time.is_some());
    }

    #[test]
    fn test_resume_attempt_allows_failure_after_retry() {
        let mut record = record();
        record.begin_attempt(Utc::now());
        record.finish(ExecutionStatus::Retry, None, Utc::now()).unwrap();
        assert!(record.fail("lost".to_string(), Utc::now()).is_err());

        record.resume_attempt(Utc::now());
        assert_eq!(record.status, ExecutionStatus::Started);
        assert_eq!(record.retry_count, 0);
        assert!(record.fail("lost".to_string(), Utc::now()).unwrap());
        assert_eq!(record.status, ExecutionStatus::Failure);
    }

    #[test]
    fn test_retry_loops_back_to_started() {
        let mut record = record();
        record.begin_attempt(Utc::now());
        assert!(record.finish(ExecutionStatus::Retry, None, Utc::now()).unwrap());
        assert_eq!(record.begin_attempt(Utc::now()), AttemptOutcome::Retried);
        assert_eq!(record.status, ExecutionStatus::Started);
        assert_eq!(record.retry_count, 1);
        assert!(record.complete_time.is_none());
    }

    #[test]
    fn test_terminal_records_ignore_new_attempts() {
        let mut record = record();
        record.begin_attempt(Utc::now());
        record
            .finish(ExecutionStatus::Success, Some(json!({"ok": true})), Utc::now())
            .unwrap();

        assert_eq!(record.begin_attempt(Utc::now()), AttemptOutcome::AlreadyFinished);
        assert_eq!(record.status, ExecutionStatus::Success);
        assert_eq!(record.result, Some(json!({"ok": true})));
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut record = record();
        assert!(record.finish(ExecutionStatus::Success, None, Utc::now()).is_err());
        assert!(record.finish(ExecutionStatus::Pending, None, Utc::now()).is_err());

        record.begin_attempt(Utc::now());
        record.fail("boom".to_string(), Utc::now()).unwrap();
        assert!(record.finish(ExecutionStatus::Success, None, Utc::now()).is_err());
    }

    #[test]
    fn test_duplicate_failure_is_idempotent() {
        let mut record = record();
        record.begin_attempt(Utc::now());
        assert!(record.fail("first".to_string(), Utc::now()).unwrap());
        assert!(!record.fail("second".to_string(), Utc::now()).unwrap());
        assert_eq!(record.traceback.as_deref(), Some("first"));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("failure".parse::<ExecutionStatus>().unwrap(), ExecutionStatus::Failure);
        assert!("DONE".parse::<ExecutionStatus>().is_err());
    }
}
