use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::{
    beat_worker::{BeatConfig, WorkerConfig},
    database::DatabaseConfig,
    router_queue::{QueueConfig, RouterConfig},
    seed_task::SeedTaskConfig,
};

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub beat: BeatConfig,
    pub router: RouterConfig,
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub tasks: Vec<SeedTaskConfig>,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序:
    /// 1. 各配置段的默认值
    /// 2. 配置文件 (TOML格式)
    /// 3. 环境变量覆盖 (前缀: TASKBEAT_，层级分隔符: __)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/taskbeat.toml",
                "taskbeat.toml",
                "/etc/taskbeat/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TASKBEAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.beat.validate().context("Beat配置验证失败")?;
        self.router.validate().context("路由配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;

        let mut names = HashSet::new();
        for task in &self.tasks {
            if !names.insert(task.name.as_str()) {
                return Err(anyhow::anyhow!("种子任务名称重复: {}", task.name));
            }
            task.to_definition()
                .with_context(|| format!("种子任务配置验证失败: {}", task.name))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QueueName, ScheduleKind};
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.router.default_queue, QueueName::PriorityLow);
        assert_eq!(config.beat.refresh_interval_seconds, 30);
        assert!(config.tasks.is_empty());
    }

    #[test]
    fn test_from_toml_with_seed_tasks() {
        let toml_str = r#"
[database]
url = "sqlite::memory:"

[beat]
refresh_interval_seconds = 10

[[tasks]]
name = "cleanup"
target = "app.cleanup"
interval_seconds = 60

[[tasks]]
name = "report"
target = "app.report"
cron = "30 2 * * 1-5"
extra_config = { queue = "priority_high" }
"#;
        let config = AppConfig::from_toml(toml_str).unwrap();
        assert!(config.database.is_in_memory());
        assert_eq!(config.beat.refresh_interval_seconds, 10);
        assert_eq!(config.tasks.len(), 2);

        let report = config.tasks[1].to_definition().unwrap();
        match report.schedule {
            ScheduleKind::Cron(fields) => {
                assert_eq!(fields.minute, "30");
                assert_eq!(fields.hour, "2");
                assert_eq!(fields.day_of_week, "1-5");
            }
            other => panic!("unexpected schedule: {other:?}"),
        }
        assert_eq!(report.extra_config.queue.as_deref(), Some("priority_high"));
    }

    #[test]
    fn test_message_expiry_is_bounded() {
        let mut config = AppConfig::default();
        config.beat.message_expiry_seconds = Some(3600);
        assert!(config.validate().is_ok());

        config.beat.message_expiry_seconds = Some(u64::MAX);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_seed_task_requires_exactly_one_schedule() {
        let both = r#"
[[tasks]]
name = "bad"
target = "app.bad"
interval_seconds = 5
cron = "* * * * *"
"#;
        assert!(AppConfig::from_toml(both).is_err());

        let neither = r#"
[[tasks]]
name = "bad"
target = "app.bad"
"#;
        assert!(AppConfig::from_toml(neither).is_err());
    }

    #[test]
    fn test_duplicate_seed_task_names_rejected() {
        let toml_str = r#"
[[tasks]]
name = "dup"
target = "a"
interval_seconds = 5

[[tasks]]
name = "dup"
target = "b"
interval_seconds = 6
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_invalid_sleep_bounds_rejected() {
        let toml_str = r#"
[beat]
min_sleep_seconds = 10
max_sleep_seconds = 5
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[worker]
worker_id = "test-worker"
queues = ["priority_low", "system"]
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.worker.worker_id, "test-worker");
        assert_eq!(
            config.worker.consumption_order(),
            vec![QueueName::System, QueueName::PriorityLow]
        );
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/taskbeat.toml")).is_err());
    }

    #[test]
    fn test_toml_roundtrip_keeps_router() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(
            parsed.router.system_target_prefixes,
            config.router.system_target_prefixes
        );
    }
}
