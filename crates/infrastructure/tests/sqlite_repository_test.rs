#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use taskbeat_core::{
        config::DatabaseConfig,
        models::{
            CronFields, ExecutionRecord, ExecutionRecordFilter, ExecutionStatus, ExtraConfig,
            TaskDefinition,
        },
        traits::{ExecutionRecordRepository, TaskDefinitionRepository},
        SchedulerError,
    };
    use taskbeat_infrastructure::{
        DatabaseManager, SqliteExecutionRecordRepository, SqliteTaskDefinitionRepository,
    };

    async fn setup() -> DatabaseManager {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        let manager = DatabaseManager::new(&config).await.unwrap();
        manager.migrate().await.unwrap();
        manager
    }

    #[tokio::test]
    async fn test_migrate_is_repeatable_and_healthy() {
        let manager = setup().await;
        manager.migrate().await.unwrap();
        manager.health_check().await.unwrap();
        manager.close().await;
    }

    #[tokio::test]
    async fn test_file_database_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskbeat.db");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            ..Default::default()
        };

        {
            let manager = DatabaseManager::new(&config).await.unwrap();
            manager.migrate().await.unwrap();
            let repo = SqliteTaskDefinitionRepository::new(manager.pool().clone());
            repo.create(&TaskDefinition::interval("persisted", "builtin.echo", 60))
                .await
                .unwrap();
            manager.close().await;
        }

        let manager = DatabaseManager::new(&config).await.unwrap();
        let repo = SqliteTaskDefinitionRepository::new(manager.pool().clone());
        assert!(repo.get_by_name("persisted").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_task_definition_roundtrip() {
        let manager = setup().await;
        let repo = SqliteTaskDefinitionRepository::new(manager.pool().clone());

        let mut extra = ExtraConfig::default().with_queue("priority_high").with_timeout(45);
        extra.passthrough.insert("agent_id".to_string(), json!(7));
        let task = TaskDefinition::cron(
            "weekday_report",
            "app.report",
            CronFields::from_expression("30 2 * * 1-5").unwrap(),
        )
        .with_args(vec![json!("daily"), json!(3)])
        .with_kwargs(json!({"format": "csv"}).as_object().cloned().unwrap())
        .with_extra_config(extra);

        let created = repo.create(&task).await.unwrap();
        assert!(created.id > 0);

        let loaded = repo.get_by_name("weekday_report").await.unwrap().unwrap();
        assert_eq!(loaded.schedule, task.schedule);
        assert_eq!(loaded.args, task.args);
        assert_eq!(loaded.kwargs["format"], json!("csv"));
        assert_eq!(loaded.extra_config.queue.as_deref(), Some("priority_high"));
        assert_eq!(loaded.extra_config.timeout, Some(45));
        assert_eq!(loaded.extra_config.passthrough["agent_id"], json!(7));
        assert_eq!(loaded.run_count, 0);
        assert!(loaded.last_run_at.is_none());

        assert!(repo.get_by_name("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let manager = setup().await;
        let repo = SqliteTaskDefinitionRepository::new(manager.pool().clone());

        repo.create(&TaskDefinition::interval("health_check", "system.health_check", 1800))
            .await
            .unwrap();
        let err = repo
            .create(&TaskDefinition::interval("health_check", "system.other", 60))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateTaskName { ref name } if name == "health_check"));

        // 原有定义保持不变
        let existing = repo.get_by_name("health_check").await.unwrap().unwrap();
        assert_eq!(existing.target, "system.health_check");
    }

    #[tokio::test]
    async fn test_list_enabled_skips_disabled_and_undecodable_rows() {
        let manager = setup().await;
        let repo = SqliteTaskDefinitionRepository::new(manager.pool().clone());

        repo.create(&TaskDefinition::interval("b_task", "builtin.echo", 60))
            .await
            .unwrap();
        repo.create(&TaskDefinition::interval("a_task", "builtin.echo", 30))
            .await
            .unwrap();
        repo.create(&TaskDefinition::interval("off", "builtin.echo", 30).disabled())
            .await
            .unwrap();
        repo.create(&TaskDefinition::interval("broken", "builtin.echo", 30))
            .await
            .unwrap();
        sqlx::query("UPDATE task_definitions SET args = 'not json' WHERE name = 'broken'")
            .execute(manager.pool())
            .await
            .unwrap();

        let names: Vec<String> = repo
            .list_enabled()
            .await
            .unwrap()
            .into_iter()
            .map(|task| task.name)
            .collect();
        assert_eq!(names, vec!["a_task", "b_task"]);
    }

    #[tokio::test]
    async fn test_schedule_columns_are_mutually_exclusive() {
        let manager = setup().await;

        let result = sqlx::query(
            "INSERT INTO task_definitions (name, target, interval_seconds, cron_minute) VALUES ('both', 'x', 60, '*')",
        )
        .execute(manager.pool())
        .await;
        assert!(result.is_err());

        let result = sqlx::query("INSERT INTO task_definitions (name, target) VALUES ('neither', 'x')")
            .execute(manager.pool())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_metadata_is_monotonic() {
        let manager = setup().await;
        let repo = SqliteTaskDefinitionRepository::new(manager.pool().clone());
        repo.create(&TaskDefinition::interval("sync", "builtin.echo", 60))
            .await
            .unwrap();

        let later = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let earlier = later - Duration::minutes(5);

        repo.update_dispatch_metadata("sync", later, 5).await.unwrap();
        repo.update_dispatch_metadata("sync", earlier, 3).await.unwrap();

        let task = repo.get_by_name("sync").await.unwrap().unwrap();
        assert_eq!(task.last_run_at, Some(later));
        assert_eq!(task.run_count, 5);

        let newest = later + Duration::seconds(60);
        repo.update_dispatch_metadata("sync", newest, 6).await.unwrap();
        let task = repo.get_by_name("sync").await.unwrap().unwrap();
        assert_eq!(task.last_run_at, Some(newest));
        assert_eq!(task.run_count, 6);
    }

    #[tokio::test]
    async fn test_dispatch_metadata_for_deleted_task() {
        let manager = setup().await;
        let repo = SqliteTaskDefinitionRepository::new(manager.pool().clone());
        repo.create(&TaskDefinition::interval("gone", "builtin.echo", 60))
            .await
            .unwrap();
        repo.delete("gone").await.unwrap();

        let err = repo
            .update_dispatch_metadata("gone", Utc::now(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::TaskNotFound { .. }));
        assert!(matches!(
            repo.delete("gone").await,
            Err(SchedulerError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_keeps_dispatch_metadata() {
        let manager = setup().await;
        let repo = SqliteTaskDefinitionRepository::new(manager.pool().clone());
        repo.create(&TaskDefinition::interval("sync", "builtin.echo", 60))
            .await
            .unwrap();
        let run_at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        repo.update_dispatch_metadata("sync", run_at, 2).await.unwrap();

        let mut edited = TaskDefinition::interval("sync", "builtin.echo", 120);
        edited.run_count = 0;
        repo.update(&edited).await.unwrap();
        repo.set_enabled("sync", false).await.unwrap();

        let task = repo.get_by_name("sync").await.unwrap().unwrap();
        assert_eq!(task.schedule.describe(), "every 120s");
        assert!(!task.enabled);
        assert_eq!(task.last_run_at, Some(run_at));
        assert_eq!(task.run_count, 2);
    }

    fn record(invocation_id: &str, task_name: &str, minutes_ago: i64) -> ExecutionRecord {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() - Duration::minutes(minutes_ago);
        ExecutionRecord::pending(invocation_id, task_name, vec![json!(1)], Default::default(), at)
    }

    #[tokio::test]
    async fn test_execution_record_lifecycle() {
        let manager = setup().await;
        let repo = SqliteExecutionRecordRepository::new(manager.pool().clone());

        let created = repo.create(&record("inv-1", "report", 0)).await.unwrap();
        assert!(created.id > 0);

        let mut loaded = repo.get_by_invocation_id("inv-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Pending);
        assert_eq!(loaded.args, vec![json!(1)]);

        let now = Utc::now();
        loaded.begin_attempt(now);
        loaded.worker_id = Some("host-worker".to_string());
        repo.update(&loaded).await.unwrap();

        loaded
            .finish(ExecutionStatus::Success, Some(json!({"rows": 12})), now)
            .unwrap();
        repo.update(&loaded).await.unwrap();

        let done = repo.get_by_invocation_id("inv-1").await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Success);
        assert_eq!(done.result, Some(json!({"rows": 12})));
        assert_eq!(done.worker_id.as_deref(), Some("host-worker"));
        assert!(done.complete_time.is_some());
    }

    #[tokio::test]
    async fn test_execution_record_duplicate_and_missing() {
        let manager = setup().await;
        let repo = SqliteExecutionRecordRepository::new(manager.pool().clone());

        repo.create(&record("inv-1", "report", 0)).await.unwrap();
        assert!(repo.create(&record("inv-1", "report", 0)).await.is_err());

        let err = repo.update(&record("inv-missing", "report", 0)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ExecutionRecordNotFound { .. }));
    }

    #[tokio::test]
    async fn test_execution_record_list_filters_and_orders() {
        let manager = setup().await;
        let repo = SqliteExecutionRecordRepository::new(manager.pool().clone());

        repo.create(&record("inv-old", "report", 30)).await.unwrap();
        repo.create(&record("inv-new", "report", 1)).await.unwrap();
        repo.create(&record("inv-other", "cleanup", 10)).await.unwrap();

        let mut failed = record("inv-failed", "report", 5);
        failed.begin_attempt(Utc::now());
        failed.fail("Traceback: boom".to_string(), Utc::now()).unwrap();
        repo.create(&failed).await.unwrap();

        let all = repo.list(&ExecutionRecordFilter::default()).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.invocation_id.as_str()).collect();
        assert_eq!(ids, vec!["inv-new", "inv-failed", "inv-other", "inv-old"]);

        let reports = repo
            .list(&ExecutionRecordFilter {
                task_name: Some("report".to_string()),
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<&str> = reports.iter().map(|r| r.invocation_id.as_str()).collect();
        assert_eq!(ids, vec!["inv-new", "inv-failed"]);

        let page = repo
            .list(&ExecutionRecordFilter {
                task_name: Some("report".to_string()),
                limit: Some(2),
                offset: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].invocation_id, "inv-old");

        let failures = repo
            .list(&ExecutionRecordFilter {
                status: Some(ExecutionStatus::Failure),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].traceback.as_deref(), Some("Traceback: boom"));
    }
}
