use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::SchedulerError;

/// 任务定义
///
/// 表示一个持久化的周期任务：执行什么（`target` + 参数）以及何时执行（`schedule`）。
///
/// # 字段说明
///
/// - `name`: 全局唯一的任务名称
/// - `target`: 处理器标识，例如 `system.health_check`
/// - `enabled`: 是否参与调度
/// - `schedule`: interval 或 cron 调度规则，二者必居其一
/// - `args` / `kwargs`: 传给处理器的位置参数与关键字参数
/// - `extra_config`: 队列覆盖、超时等可选配置
/// - `last_run_at` / `run_count`: 由调度器回写，只增不减
///
/// # 使用示例
///
/// ```rust
/// use taskbeat_core::models::TaskDefinition;
///
/// let task = TaskDefinition::interval("health_check", "system.health_check", 1800);
/// assert!(task.enabled);
/// assert_eq!(task.run_count, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: i64,
    pub name: String,
    pub target: String,
    pub enabled: bool,
    pub schedule: ScheduleKind,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub extra_config: ExtraConfig,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskDefinition {
    /// 创建新任务定义
    pub fn new(name: impl Into<String>, target: impl Into<String>, schedule: ScheduleKind) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            name: name.into(),
            target: target.into(),
            enabled: true,
            schedule,
            args: Vec::new(),
            kwargs: Map::new(),
            extra_config: ExtraConfig::default(),
            last_run_at: None,
            run_count: 0,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 创建固定间隔任务
    pub fn interval(name: impl Into<String>, target: impl Into<String>, seconds: u64) -> Self {
        Self::new(name, target, ScheduleKind::Interval { seconds })
    }

    /// 创建 cron 任务
    pub fn cron(name: impl Into<String>, target: impl Into<String>, fields: CronFields) -> Self {
        Self::new(name, target, ScheduleKind::Cron(fields))
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_extra_config(mut self, extra_config: ExtraConfig) -> Self {
        self.extra_config = extra_config;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// 调度规则
///
/// 以带标签的枚举替代松散的 JSON 配置：一个任务要么是固定间隔，要么是 cron。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    Interval { seconds: u64 },
    Cron(CronFields),
}

impl ScheduleKind {
    pub fn kind_str(&self) -> &'static str {
        match self {
            ScheduleKind::Interval { .. } => "interval",
            ScheduleKind::Cron(_) => "cron",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ScheduleKind::Interval { seconds } => format!("every {seconds}s"),
            ScheduleKind::Cron(fields) => format!("cron({fields})"),
        }
    }
}

/// cron 的五个字段
///
/// 每个字段是模式字符串：`*`、数字、步长 `*/N` 或逗号分隔的列表。
/// 字段语法在调度匹配器中解析，这里只保存原始文本。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronFields {
    pub minute: String,
    pub hour: String,
    pub day_of_week: String,
    pub day_of_month: String,
    pub month_of_year: String,
}

impl Default for CronFields {
    fn default() -> Self {
        Self {
            minute: "*".to_string(),
            hour: "*".to_string(),
            day_of_week: "*".to_string(),
            day_of_month: "*".to_string(),
            month_of_year: "*".to_string(),
        }
    }
}

impl CronFields {
    pub fn new(minute: &str, hour: &str, day_of_week: &str, day_of_month: &str, month_of_year: &str) -> Self {
        Self {
            minute: minute.to_string(),
            hour: hour.to_string(),
            day_of_week: day_of_week.to_string(),
            day_of_month: day_of_month.to_string(),
            month_of_year: month_of_year.to_string(),
        }
    }

    /// 从标准五段式表达式解析（分 时 日 月 周）
    pub fn from_expression(expr: &str) -> Result<Self, SchedulerError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        match parts.as_slice() {
            [minute, hour, day_of_month, month_of_year, day_of_week] => Ok(Self::new(
                minute,
                hour,
                day_of_week,
                day_of_month,
                month_of_year,
            )),
            _ => Err(SchedulerError::Configuration(format!(
                "cron表达式需要5个字段(分 时 日 月 周): '{expr}'"
            ))),
        }
    }
}

impl std::fmt::Display for CronFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month_of_year, self.day_of_week
        )
    }
}

/// 任务的附加配置
///
/// 识别 `queue`、`timeout`、`task_type` 三个键，其余键原样透传。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(flatten)]
    pub passthrough: Map<String, Value>,
}

impl ExtraConfig {
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
