//! interval/cron 到期判断
//!
//! 纯函数，不读时钟也不做 I/O。cron 字段支持：
//! - `*` 任意值
//! - `*/N` 取值能被 N 整除
//! - `a` 精确匹配
//! - `a-b` 闭区间，`a-b/N` 区间内从 a 开始每隔 N
//! - 以上各项用逗号组成列表
//!
//! 星期字段取值 0-7，0 和 7 都表示周日。五个字段必须同时匹配。

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use thiserror::Error;

use taskbeat_core::models::{CronFields, ScheduleKind};

/// 下一次匹配的最大搜索范围（分钟）
pub const MAX_SEARCH_MINUTES: i64 = 366 * 24 * 60;

/// 调度规则语法错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("interval 必须大于0")]
    ZeroInterval,

    #[error("interval {0} 秒超出可表示范围")]
    IntervalTooLarge(u64),

    #[error("cron 字段 {field} 的值 '{value}' 无效: {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// 一次到期判断的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueCheck {
    pub is_due: bool,
    /// 距离下一次到期的秒数（向上取整）
    pub seconds_until_next: u64,
}

/// 判断调度规则在 `now` 是否到期
pub fn is_due(
    schedule: &ScheduleKind,
    last_run_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<DueCheck, PatternError> {
    Ok(CompiledSchedule::compile(schedule)?.is_due(last_run_at, now))
}

/// 预先解析好的调度规则
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledSchedule {
    Interval { seconds: u64 },
    Cron(CronPattern),
}

impl CompiledSchedule {
    pub fn compile(schedule: &ScheduleKind) -> Result<Self, PatternError> {
        match schedule {
            ScheduleKind::Interval { seconds: 0 } => Err(PatternError::ZeroInterval),
            ScheduleKind::Interval { seconds } if i64::try_from(*seconds).is_err() => {
                Err(PatternError::IntervalTooLarge(*seconds))
            }
            ScheduleKind::Interval { seconds } => Ok(Self::Interval { seconds: *seconds }),
            ScheduleKind::Cron(fields) => Ok(Self::Cron(CronPattern::parse(fields)?)),
        }
    }

    pub fn is_due(&self, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DueCheck {
        match self {
            Self::Interval { seconds } => interval_due(*seconds, last_run_at, now),
            Self::Cron(pattern) => pattern.is_due(last_run_at, now),
        }
    }
}

fn interval_due(seconds: u64, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DueCheck {
    let Some(last) = last_run_at else {
        return DueCheck {
            is_due: true,
            seconds_until_next: 0,
        };
    };

    let period_ms = (seconds as i64).saturating_mul(1000);
    let elapsed_ms = (now - last).num_milliseconds();
    let remaining_ms = period_ms.saturating_sub(elapsed_ms).max(0);

    DueCheck {
        is_due: elapsed_ms >= period_ms,
        seconds_until_next: ceil_seconds(remaining_ms),
    }
}

fn ceil_seconds(ms: i64) -> u64 {
    if ms <= 0 {
        0
    } else {
        ((ms + 999) / 1000) as u64
    }
}

/// 截断到整分钟
fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    let ts = t.timestamp();
    DateTime::from_timestamp(ts - ts.rem_euclid(60), 0).unwrap_or(t)
}

/// 单个 cron 字段允许的取值集合，用位图表示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1u64 << value) != 0
    }

    fn insert(&mut self, value: u32) {
        self.0 |= 1u64 << value;
    }
}

/// 解析后的 cron 模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronPattern {
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
}

impl CronPattern {
    pub fn parse(fields: &CronFields) -> Result<Self, PatternError> {
        let mut days_of_week = parse_field("day_of_week", &fields.day_of_week, 0, 7)?;
        if days_of_week.contains(7) {
            days_of_week.insert(0);
        }

        Ok(Self {
            minutes: parse_field("minute", &fields.minute, 0, 59)?,
            hours: parse_field("hour", &fields.hour, 0, 23)?,
            days_of_month: parse_field("day_of_month", &fields.day_of_month, 1, 31)?,
            months: parse_field("month_of_year", &fields.month_of_year, 1, 12)?,
            days_of_week,
        })
    }

    /// `t` 所在的分钟是否匹配全部五个字段
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        self.months.contains(t.month())
            && self.days_of_month.contains(t.day())
            && self.days_of_week.contains(t.weekday().num_days_from_sunday())
            && self.hours.contains(t.hour())
            && self.minutes.contains(t.minute())
    }

    /// `after` 所在分钟之后的第一个匹配分钟
    ///
    /// 在 [`MAX_SEARCH_MINUTES`] 内找不到时返回 `None`（例如 2月30日）。
    pub fn next_match_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = truncate_to_minute(after);
        let horizon = start + Duration::minutes(MAX_SEARCH_MINUTES);
        let mut candidate = start + Duration::minutes(1);

        while candidate <= horizon {
            let ts = candidate.timestamp();
            if !self.months.contains(candidate.month())
                || !self.days_of_month.contains(candidate.day())
                || !self.days_of_week.contains(candidate.weekday().num_days_from_sunday())
            {
                candidate = DateTime::from_timestamp(ts - ts.rem_euclid(86_400) + 86_400, 0)?;
                continue;
            }
            if !self.hours.contains(candidate.hour()) {
                candidate = DateTime::from_timestamp(ts - ts.rem_euclid(3_600) + 3_600, 0)?;
                continue;
            }
            if self.minutes.contains(candidate.minute()) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }

        None
    }

    pub fn is_due(&self, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DueCheck {
        let current_minute = truncate_to_minute(now);
        let already_ran = last_run_at.is_some_and(|last| truncate_to_minute(last) == current_minute);

        let seconds_until_next = match self.next_match_after(now) {
            Some(next) => ceil_seconds((next - now).num_milliseconds()),
            None => (MAX_SEARCH_MINUTES * 60) as u64,
        };

        DueCheck {
            is_due: self.matches(now) && !already_ran,
            seconds_until_next,
        }
    }
}

fn parse_field(
    field: &'static str,
    pattern: &str,
    min: u32,
    max: u32,
) -> Result<FieldSet, PatternError> {
    let invalid = |reason: String| PatternError::InvalidField {
        field,
        value: pattern.to_string(),
        reason,
    };

    let pattern = pattern.trim();
    if pattern.is_empty() {
        return Err(invalid("字段为空".to_string()));
    }

    let mut set = FieldSet(0);
    for item in pattern.split(',') {
        let item = item.trim();
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("步长 '{step}' 不是数字")))?;
                if step == 0 {
                    return Err(invalid("步长必须大于0".to_string()));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        if range == "*" {
            for value in min..=max {
                if step.map_or(true, |n| value % n == 0) {
                    set.insert(value);
                }
            }
            continue;
        }

        let (start, end) = match range.split_once('-') {
            Some((a, b)) => (
                parse_value(a, min, max).map_err(&invalid)?,
                parse_value(b, min, max).map_err(&invalid)?,
            ),
            None => {
                if step.is_some() {
                    return Err(invalid(format!("'{item}' 的步长只能用于 * 或区间")));
                }
                let value = parse_value(range, min, max).map_err(&invalid)?;
                (value, value)
            }
        };
        if start > end {
            return Err(invalid(format!("区间 {start}-{end} 起点大于终点")));
        }

        let step = step.unwrap_or(1) as usize;
        for value in (start..=end).step_by(step) {
            set.insert(value);
        }
    }

    Ok(set)
}

fn parse_value(text: &str, min: u32, max: u32) -> Result<u32, String> {
    let value: u32 = text
        .trim()
        .parse()
        .map_err(|_| format!("'{text}' 不是数字"))?;
    if value < min || value > max {
        return Err(format!("{value} 超出范围 {min}-{max}"));
    }
    Ok(value)
}
