use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{CronFields, ExtraConfig, ScheduleKind, TaskDefinition};

/// 启动时注册的种子任务
///
/// 仅在同名任务不存在时插入，已有任务（包括被禁用或被编辑过的）保持不变。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTaskConfig {
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    /// 五段式 cron 表达式：分 时 日 月 周
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    #[serde(default)]
    pub extra_config: ExtraConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SeedTaskConfig {
    pub fn to_definition(&self) -> anyhow::Result<TaskDefinition> {
        let schedule = match (self.interval_seconds, &self.cron) {
            (Some(_), Some(_)) => {
                return Err(anyhow::anyhow!(
                    "种子任务 {} 不能同时设置 interval_seconds 和 cron",
                    self.name
                ))
            }
            (None, None) => {
                return Err(anyhow::anyhow!(
                    "种子任务 {} 必须设置 interval_seconds 或 cron",
                    self.name
                ))
            }
            (Some(0), None) => {
                return Err(anyhow::anyhow!("种子任务 {} 的间隔必须大于0", self.name))
            }
            (Some(seconds), None) => ScheduleKind::Interval { seconds },
            (None, Some(expr)) => ScheduleKind::Cron(CronFields::from_expression(expr)?),
        };

        let mut definition = TaskDefinition::new(&self.name, &self.target, schedule)
            .with_args(self.args.clone())
            .with_kwargs(self.kwargs.clone())
            .with_extra_config(self.extra_config.clone());
        definition.enabled = self.enabled;
        definition.created_by = Some("config".to_string());
        Ok(definition)
    }
}
