use tracing::warn;

use taskbeat_core::{
    config::RouterConfig,
    models::{ExtraConfig, QueueName, ScheduleEntry, TaskDefinition},
};

/// 任务路由
///
/// 规则按优先级依次为：
/// 1. `target` 以系统前缀开头的任务总是进入 `system` 队列，忽略任何覆盖
/// 2. `extra_config.queue` 为 `priority_high` 或 `priority_low` 时使用该队列
/// 3. 否则使用默认队列
#[derive(Debug, Clone)]
pub struct TaskRouter {
    system_prefixes: Vec<String>,
    default_queue: QueueName,
}

impl TaskRouter {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            system_prefixes: config.system_target_prefixes.clone(),
            default_queue: config.default_queue,
        }
    }

    pub fn is_system_target(&self, target: &str) -> bool {
        self.system_prefixes
            .iter()
            .any(|prefix| target.starts_with(prefix.as_str()))
    }

    pub fn route(&self, target: &str, extra_config: &ExtraConfig) -> QueueName {
        if self.is_system_target(target) {
            return QueueName::System;
        }

        match extra_config.queue.as_deref() {
            None => self.default_queue,
            Some("priority_high") => QueueName::PriorityHigh,
            Some("priority_low") => QueueName::PriorityLow,
            Some(other) => {
                warn!(
                    "任务 {} 的队列覆盖 '{}' 无效，使用默认队列 {}",
                    target, other, self.default_queue
                );
                self.default_queue
            }
        }
    }

    pub fn route_definition(&self, task: &TaskDefinition) -> QueueName {
        self.route(&task.target, &task.extra_config)
    }

    pub fn route_entry(&self, entry: &ScheduleEntry) -> QueueName {
        self.route(&entry.target, &entry.extra_config)
    }
}

impl Default for TaskRouter {
    fn default() -> Self {
        Self::new(&RouterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extra(queue: Option<&str>) -> ExtraConfig {
        ExtraConfig {
            queue: queue.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_system_target_ignores_override() {
        let router = TaskRouter::default();
        for queue in [None, Some("priority_low"), Some("priority_high"), Some("bogus")] {
            assert_eq!(
                router.route("system.health_check", &extra(queue)),
                QueueName::System
            );
        }
    }

    #[test]
    fn test_recognized_overrides_are_honoured() {
        let router = TaskRouter::default();
        assert_eq!(
            router.route("app.report", &extra(Some("priority_high"))),
            QueueName::PriorityHigh
        );
        assert_eq!(
            router.route("app.report", &extra(Some("priority_low"))),
            QueueName::PriorityLow
        );
    }

    #[test]
    fn test_unknown_or_missing_override_falls_back() {
        let router = TaskRouter::default();
        assert_eq!(router.route("app.report", &extra(None)), QueueName::PriorityLow);
        assert_eq!(
            router.route("app.report", &extra(Some("system"))),
            QueueName::PriorityLow
        );
        assert_eq!(
            router.route("app.report", &extra(Some("default"))),
            QueueName::PriorityLow
        );
    }

    #[test]
    fn test_custom_prefixes_and_default() {
        let router = TaskRouter::new(&RouterConfig {
            system_target_prefixes: vec!["maint.".to_string(), "ops.".to_string()],
            default_queue: QueueName::Default,
        });
        assert_eq!(router.route("ops.vacuum", &extra(None)), QueueName::System);
        assert_eq!(router.route("system.ping", &extra(None)), QueueName::Default);
        assert!(!router.is_system_target("app.ops.job"));
    }

    #[test]
    fn test_route_definition_uses_target_and_extra_config() {
        let router = TaskRouter::default();
        let mut task = TaskDefinition::interval("report", "app.report", 60);
        task.extra_config.queue = Some("priority_high".to_string());
        assert_eq!(router.route_definition(&task), QueueName::PriorityHigh);
    }
}
