use chrono::{DateTime, Utc};

/// 时间来源
///
/// 调度器与执行追踪器通过该接口获取当前时间，测试中可替换为手动时钟。
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
