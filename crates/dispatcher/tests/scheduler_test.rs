#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use tokio::sync::broadcast;

    use taskbeat_core::config::BeatConfig;
    use taskbeat_core::Clock;
    use taskbeat_core::models::{QueueName, TaskMessage};
    use taskbeat_core::traits::{
        FailurePayload, PostRunPayload, TaskDefinitionRepository, TaskExecutionHooks,
        TaskInvocation,
    };
    use taskbeat_dispatcher::{BeatScheduler, ScheduleStore, TaskRouter};
    use taskbeat_testing_utils::{
        ManualClock, MockMessageQueue, MockTaskDefinitionRepository, TaskDefinitionBuilder,
    };

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 7, 29, 30).unwrap()
    }

    fn beat_config() -> BeatConfig {
        BeatConfig {
            store_retry_backoff_ms: 0,
            ..Default::default()
        }
    }

    fn build_scheduler(
        repo: &MockTaskDefinitionRepository,
        queue: &MockMessageQueue,
        clock: &ManualClock,
        config: BeatConfig,
    ) -> BeatScheduler {
        let store = ScheduleStore::new(Arc::new(repo.clone()), &config);
        BeatScheduler::new(
            Arc::new(clock.clone()),
            store,
            TaskRouter::default(),
            Arc::new(queue.clone()),
            config,
        )
    }

    #[tokio::test]
    async fn test_never_run_interval_task_dispatches_on_first_tick() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![TaskDefinitionBuilder::new(
            "health_check",
        )
        .with_target("system.health_check")
        .every_seconds(1800)
        .build()]);
        let queue = MockMessageQueue::new();
        let clock = ManualClock::new(start());
        let mut scheduler = build_scheduler(&repo, &queue, &clock, beat_config());

        assert_eq!(scheduler.refresh().await.unwrap(), 1);
        let report = scheduler.tick().await;

        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(report.dispatched[0].task_name, "health_check");
        assert_eq!(queue.published()[0].0, QueueName::System);

        let entry = scheduler.entry("health_check").unwrap();
        assert_eq!(entry.last_run_at, Some(start()));
        assert_eq!(entry.total_run_count, 1);

        let stored = repo.get("health_check").unwrap();
        assert_eq!(stored.last_run_at, Some(start()));
        assert_eq!(stored.run_count, 1);
    }

    #[tokio::test]
    async fn test_interval_task_not_dispatched_twice_within_period() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![
            TaskDefinitionBuilder::new("sync").every_seconds(60).build(),
        ]);
        let queue = MockMessageQueue::new();
        let clock = ManualClock::new(start());
        let mut scheduler = build_scheduler(&repo, &queue, &clock, beat_config());
        scheduler.refresh().await.unwrap();

        assert_eq!(scheduler.tick().await.dispatched.len(), 1);
        clock.advance_secs(59);
        assert!(scheduler.tick().await.dispatched.is_empty());
        clock.advance_secs(1);
        assert_eq!(scheduler.tick().await.dispatched.len(), 1);
        assert_eq!(queue.published_for("sync").len(), 2);
    }

    #[tokio::test]
    async fn test_cron_every_thirty_minutes() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![TaskDefinitionBuilder::new(
            "report",
        )
        .with_cron("*/30 * * * *")
        .build()]);
        let queue = MockMessageQueue::new();
        let clock = ManualClock::new(start());
        let config = BeatConfig {
            refresh_interval_seconds: 3600,
            ..beat_config()
        };
        let mut scheduler = build_scheduler(&repo, &queue, &clock, config);
        scheduler.refresh().await.unwrap();

        // 07:29:30
        let report = scheduler.tick().await;
        assert!(report.dispatched.is_empty());
        assert_eq!(report.sleep, Duration::from_secs(30));

        // 07:30:00
        clock.advance_secs(30);
        assert_eq!(scheduler.tick().await.dispatched.len(), 1);

        // 同一分钟内不会重复分发
        clock.advance_secs(40);
        assert!(scheduler.tick().await.dispatched.is_empty());

        // 07:31:10
        clock.advance_secs(30);
        assert!(scheduler.tick().await.dispatched.is_empty());

        clock.set(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
        assert_eq!(scheduler.tick().await.dispatched.len(), 1);
        assert_eq!(queue.published_for("report").len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![
            TaskDefinitionBuilder::new("a").every_seconds(10).build(),
            TaskDefinitionBuilder::new("b")
                .with_cron("0 3 * * *")
                .with_queue("priority_high")
                .build(),
        ]);
        let queue = MockMessageQueue::new();
        let clock = ManualClock::new(start());
        let mut scheduler = build_scheduler(&repo, &queue, &clock, beat_config());

        scheduler.refresh().await.unwrap();
        let first: Vec<_> = scheduler.entries().cloned().collect();
        scheduler.refresh().await.unwrap();
        let second: Vec<_> = scheduler.entries().cloned().collect();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_disabled_task_removed_within_refresh_interval() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![
            TaskDefinitionBuilder::new("keep").every_seconds(10).build(),
            TaskDefinitionBuilder::new("drop").every_seconds(10).build(),
        ]);
        let queue = MockMessageQueue::new();
        let clock = ManualClock::new(start());
        let mut scheduler = build_scheduler(&repo, &queue, &clock, beat_config());
        scheduler.refresh().await.unwrap();

        clock.advance_secs(5);
        repo.set_enabled("drop", false).await.unwrap();
        assert!(!scheduler.refresh_due(clock.now()));
        assert!(scheduler.entry("drop").is_some());

        clock.advance_secs(25);
        assert!(scheduler.refresh_due(clock.now()));
        scheduler.refresh().await.unwrap();
        assert!(scheduler.entry("drop").is_none());
        assert!(scheduler.entry("keep").is_some());
    }

    #[tokio::test]
    async fn test_store_outage_keeps_previous_schedule() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![
            TaskDefinitionBuilder::new("sync").every_seconds(60).build(),
        ]);
        let queue = MockMessageQueue::new();
        let clock = ManualClock::new(start());
        let mut scheduler = build_scheduler(&repo, &queue, &clock, beat_config());
        scheduler.refresh().await.unwrap();
        assert_eq!(scheduler.tick().await.dispatched.len(), 1);

        repo.set_unavailable(true);
        clock.advance_secs(30);
        assert!(scheduler.refresh().await.is_err());
        assert_eq!(scheduler.len(), 1);

        clock.advance_secs(30);
        let report = scheduler.tick().await;
        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(queue.published_for("sync").len(), 2);

        // 恢复后的刷新不会让分发时间倒退
        repo.set_unavailable(false);
        scheduler.refresh().await.unwrap();
        let entry = scheduler.entry("sync").unwrap();
        assert_eq!(entry.last_run_at, Some(clock.now()));
        assert_eq!(entry.total_run_count, 2);
        assert!(scheduler.tick().await.dispatched.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_write_failure_is_fail_open() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![
            TaskDefinitionBuilder::new("sync").every_seconds(60).build(),
        ]);
        let queue = MockMessageQueue::new();
        let clock = ManualClock::new(start());
        let mut scheduler = build_scheduler(&repo, &queue, &clock, beat_config());
        scheduler.refresh().await.unwrap();

        repo.fail_next_writes(3);
        let report = scheduler.tick().await;
        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(repo.get("sync").unwrap().last_run_at, None);
        assert_eq!(scheduler.entry("sync").unwrap().last_run_at, Some(start()));

        scheduler.refresh().await.unwrap();
        clock.advance_secs(1);
        assert!(scheduler.tick().await.dispatched.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_retries_next_tick() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![
            TaskDefinitionBuilder::new("sync").every_seconds(600).build(),
        ]);
        let queue = MockMessageQueue::new();
        let clock = ManualClock::new(start());
        let mut scheduler = build_scheduler(&repo, &queue, &clock, beat_config());
        scheduler.refresh().await.unwrap();

        queue.set_failing(true);
        let report = scheduler.tick().await;
        assert!(report.dispatched.is_empty());
        assert_eq!(report.failed, vec!["sync".to_string()]);
        assert_eq!(report.sleep, Duration::from_secs(1));
        assert_eq!(scheduler.entry("sync").unwrap().last_run_at, None);
        assert_eq!(repo.dispatch_write_count(), 0);

        queue.set_failing(false);
        clock.advance_secs(1);
        assert_eq!(scheduler.tick().await.dispatched.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![
            TaskDefinitionBuilder::new("good").every_seconds(10).build(),
            TaskDefinitionBuilder::new("bad_cron")
                .with_cron("61 * * * *")
                .build(),
            TaskDefinitionBuilder::new("bad_interval").every_seconds(0).build(),
        ]);
        let queue = MockMessageQueue::new();
        let clock = ManualClock::new(start());
        let mut scheduler = build_scheduler(&repo, &queue, &clock, beat_config());

        assert_eq!(scheduler.refresh().await.unwrap(), 1);
        let report = scheduler.tick().await;
        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(report.dispatched[0].task_name, "good");
    }

    #[tokio::test]
    async fn test_routing_precedence_applied_on_dispatch() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![
            TaskDefinitionBuilder::new("cleanup")
                .with_target("system.cleanup")
                .with_queue("priority_low")
                .build(),
            TaskDefinitionBuilder::new("urgent")
                .with_target("app.urgent")
                .with_queue("priority_high")
                .build(),
            TaskDefinitionBuilder::new("misc")
                .with_target("app.misc")
                .with_queue("nonsense")
                .build(),
        ]);
        let queue = MockMessageQueue::new();
        let clock = ManualClock::new(start());
        let mut scheduler = build_scheduler(&repo, &queue, &clock, beat_config());
        scheduler.refresh().await.unwrap();
        scheduler.tick().await;

        assert_eq!(queue.published_for("cleanup")[0].0, QueueName::System);
        assert_eq!(queue.published_for("urgent")[0].0, QueueName::PriorityHigh);
        assert_eq!(queue.published_for("misc")[0].0, QueueName::PriorityLow);
    }

    #[tokio::test]
    async fn test_sleep_bounded_by_next_due_and_refresh() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![
            TaskDefinitionBuilder::new("slow").every_seconds(300).build(),
        ]);
        let queue = MockMessageQueue::new();
        let clock = ManualClock::new(start());

        let mut scheduler = build_scheduler(&repo, &queue, &clock, beat_config());
        scheduler.refresh().await.unwrap();
        assert_eq!(scheduler.tick().await.sleep, Duration::from_secs(30));

        let config = BeatConfig {
            refresh_interval_seconds: 3600,
            ..beat_config()
        };
        let mut scheduler = build_scheduler(&repo, &queue, &clock, config);
        scheduler.refresh().await.unwrap();
        clock.advance_secs(100);
        assert_eq!(scheduler.tick().await.sleep, Duration::from_secs(200));
    }

    #[derive(Default)]
    struct RecordingHooks {
        dispatched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskExecutionHooks for RecordingHooks {
        async fn on_dispatch(&self, message: &TaskMessage) {
            self.dispatched
                .lock()
                .unwrap()
                .push(message.invocation_id.clone());
        }

        async fn pre_run(&self, _invocation: &TaskInvocation) {}

        async fn post_run(&self, _invocation_id: &str, _task_name: &str, _payload: PostRunPayload) {}

        async fn on_failure(&self, _invocation_id: &str, _task_name: &str, _payload: FailurePayload) {
        }
    }

    #[tokio::test]
    async fn test_dispatch_notifies_hooks() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![
            TaskDefinitionBuilder::new("sync").every_seconds(60).build(),
        ]);
        let queue = MockMessageQueue::new();
        let clock = ManualClock::new(start());
        let hooks = Arc::new(RecordingHooks::default());
        let mut scheduler =
            build_scheduler(&repo, &queue, &clock, beat_config()).with_hooks(hooks.clone());
        scheduler.refresh().await.unwrap();

        let report = scheduler.tick().await;
        assert_eq!(
            *hooks.dispatched.lock().unwrap(),
            vec![report.dispatched[0].invocation_id.clone()]
        );
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![TaskDefinitionBuilder::new(
            "health_check",
        )
        .with_target("system.health_check")
        .every_seconds(1800)
        .build()]);
        let queue = MockMessageQueue::new();
        let clock = ManualClock::new(start());
        let mut scheduler = build_scheduler(&repo, &queue, &clock, beat_config());
        let snapshot_rx = scheduler.subscribe();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(queue.published_for("health_check").len(), 1);
        let snapshot = snapshot_rx.borrow().clone();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "health_check");
        assert_eq!(snapshot[0].run_count, 1);
        assert_eq!(snapshot[0].due_in_seconds, 1800);
    }
}
