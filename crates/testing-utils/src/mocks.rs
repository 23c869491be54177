//! 仓储、消息队列和时钟的内存实现
//!
//! 不依赖数据库即可驱动调度器和执行追踪器的单元测试。
//! 每个 mock 都可以注入失败，用来验证容错路径。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use taskbeat_core::models::{ExecutionRecord, ExecutionRecordFilter, QueueName, TaskDefinition, TaskMessage};
use taskbeat_core::traits::{Clock, ExecutionRecordRepository, MessageQueue, TaskDefinitionRepository};
use taskbeat_core::{SchedulerError, SchedulerResult};

/// 任务定义仓储的内存实现
#[derive(Debug, Clone, Default)]
pub struct MockTaskDefinitionRepository {
    tasks: Arc<Mutex<HashMap<String, TaskDefinition>>>,
    next_id: Arc<Mutex<i64>>,
    unavailable: Arc<Mutex<bool>>,
    failing_writes: Arc<Mutex<u32>>,
    dispatch_writes: Arc<Mutex<u32>>,
}

impl MockTaskDefinitionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<TaskDefinition>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.tasks.lock().unwrap();
            let mut next_id = repo.next_id.lock().unwrap();
            for mut task in tasks {
                *next_id += 1;
                task.id = *next_id;
                map.insert(task.name.clone(), task);
            }
        }
        repo
    }

    /// 模拟存储不可达：所有读写都会失败
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    /// 接下来的 `count` 次分发元数据写入失败
    pub fn fail_next_writes(&self, count: u32) {
        *self.failing_writes.lock().unwrap() = count;
    }

    /// 成功的分发元数据写入次数
    pub fn dispatch_write_count(&self) -> u32 {
        *self.dispatch_writes.lock().unwrap()
    }

    /// 直接修改存储中的任务，模拟外部 CRUD 层的编辑
    pub fn upsert(&self, task: TaskDefinition) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.insert(task.name.clone(), task);
    }

    pub fn get(&self, name: &str) -> Option<TaskDefinition> {
        self.tasks.lock().unwrap().get(name).cloned()
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    fn check_available(&self) -> SchedulerResult<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(SchedulerError::ConfigLoad("存储不可达".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskDefinitionRepository for MockTaskDefinitionRepository {
    async fn create(&self, task: &TaskDefinition) -> SchedulerResult<TaskDefinition> {
        self.check_available()?;
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.contains_key(&task.name) {
            return Err(SchedulerError::DuplicateTaskName {
                name: task.name.clone(),
            });
        }

        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let mut created = task.clone();
        created.id = *next_id;
        tasks.insert(created.name.clone(), created.clone());
        Ok(created)
    }

    async fn get_by_name(&self, name: &str) -> SchedulerResult<Option<TaskDefinition>> {
        self.check_available()?;
        Ok(self.tasks.lock().unwrap().get(name).cloned())
    }

    async fn update(&self, task: &TaskDefinition) -> SchedulerResult<()> {
        self.check_available()?;
        let mut tasks = self.tasks.lock().unwrap();
        let existing = tasks
            .get_mut(&task.name)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                name: task.name.clone(),
            })?;

        let (last_run_at, run_count) = (existing.last_run_at, existing.run_count);
        *existing = task.clone();
        existing.last_run_at = last_run_at;
        existing.run_count = run_count;
        existing.updated_at = Utc::now();
        Ok(())
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> SchedulerResult<()> {
        self.check_available()?;
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(name).ok_or_else(|| SchedulerError::TaskNotFound {
            name: name.to_string(),
        })?;
        task.enabled = enabled;
        Ok(())
    }

    async fn delete(&self, name: &str) -> SchedulerResult<()> {
        self.check_available()?;
        self.tasks
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SchedulerError::TaskNotFound {
                name: name.to_string(),
            })
    }

    async fn list_enabled(&self) -> SchedulerResult<Vec<TaskDefinition>> {
        self.check_available()?;
        let mut tasks: Vec<TaskDefinition> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.enabled)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tasks)
    }

    async fn update_dispatch_metadata(
        &self,
        name: &str,
        last_run_at: DateTime<Utc>,
        run_count: i64,
    ) -> SchedulerResult<()> {
        self.check_available()?;
        {
            let mut failing = self.failing_writes.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(SchedulerError::Internal("模拟的写入失败".to_string()));
            }
        }

        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(name).ok_or_else(|| SchedulerError::TaskNotFound {
            name: name.to_string(),
        })?;

        if task.last_run_at.map_or(true, |current| current < last_run_at) {
            task.last_run_at = Some(last_run_at);
        }
        task.run_count = task.run_count.max(run_count);
        *self.dispatch_writes.lock().unwrap() += 1;
        Ok(())
    }
}

/// 执行记录仓储的内存实现
#[derive(Debug, Clone, Default)]
pub struct MockExecutionRecordRepository {
    records: Arc<Mutex<HashMap<String, ExecutionRecord>>>,
    next_id: Arc<Mutex<i64>>,
    failing: Arc<Mutex<bool>>,
}

impl MockExecutionRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让所有读写都失败
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn get(&self, invocation_id: &str) -> Option<ExecutionRecord> {
        self.records.lock().unwrap().get(invocation_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    fn check(&self) -> SchedulerResult<()> {
        if *self.failing.lock().unwrap() {
            return Err(SchedulerError::Internal("模拟的存储故障".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionRecordRepository for MockExecutionRecordRepository {
    async fn create(&self, record: &ExecutionRecord) -> SchedulerResult<ExecutionRecord> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.invocation_id) {
            return Err(SchedulerError::Internal(format!(
                "执行记录已存在: {}",
                record.invocation_id
            )));
        }

        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let mut created = record.clone();
        created.id = *next_id;
        records.insert(created.invocation_id.clone(), created.clone());
        Ok(created)
    }

    async fn get_by_invocation_id(
        &self,
        invocation_id: &str,
    ) -> SchedulerResult<Option<ExecutionRecord>> {
        self.check()?;
        Ok(self.records.lock().unwrap().get(invocation_id).cloned())
    }

    async fn update(&self, record: &ExecutionRecord) -> SchedulerResult<()> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&record.invocation_id) {
            Some(existing) => {
                let id = existing.id;
                *existing = record.clone();
                existing.id = id;
                Ok(())
            }
            None => Err(SchedulerError::ExecutionRecordNotFound {
                invocation_id: record.invocation_id.clone(),
            }),
        }
    }

    async fn list(&self, filter: &ExecutionRecordFilter) -> SchedulerResult<Vec<ExecutionRecord>> {
        self.check()?;
        let mut records: Vec<ExecutionRecord> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| filter.task_name.as_ref().map_or(true, |n| &r.task_name == n))
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }
}

/// 内存消息队列，保存全部投递历史
#[derive(Debug, Clone, Default)]
pub struct MockMessageQueue {
    queues: Arc<Mutex<HashMap<QueueName, VecDeque<TaskMessage>>>>,
    published: Arc<Mutex<Vec<(QueueName, TaskMessage)>>>,
    failing: Arc<Mutex<bool>>,
}

impl MockMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让后续投递失败
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// 按投递顺序返回全部历史消息
    pub fn published(&self) -> Vec<(QueueName, TaskMessage)> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_for(&self, task_name: &str) -> Vec<(QueueName, TaskMessage)> {
        self.published()
            .into_iter()
            .filter(|(_, m)| m.task_name == task_name)
            .collect()
    }
}

#[async_trait]
impl MessageQueue for MockMessageQueue {
    async fn publish_message(&self, queue: QueueName, message: &TaskMessage) -> SchedulerResult<()> {
        if *self.failing.lock().unwrap() {
            return Err(SchedulerError::MessageQueue("模拟的投递失败".to_string()));
        }
        self.queues
            .lock()
            .unwrap()
            .entry(queue)
            .or_default()
            .push_back(message.clone());
        self.published.lock().unwrap().push((queue, message.clone()));
        Ok(())
    }

    async fn consume_next(&self, order: &[QueueName]) -> SchedulerResult<Option<TaskMessage>> {
        let mut queues = self.queues.lock().unwrap();
        for queue in order {
            if let Some(message) = queues.get_mut(queue).and_then(|q| q.pop_front()) {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    async fn get_queue_size(&self, queue: QueueName) -> SchedulerResult<u32> {
        Ok(self
            .queues
            .lock()
            .unwrap()
            .get(&queue)
            .map_or(0, |q| q.len() as u32))
    }

    async fn purge_queue(&self, queue: QueueName) -> SchedulerResult<()> {
        self.queues.lock().unwrap().remove(&queue);
        Ok(())
    }
}

/// 手动推进的时钟
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn advance_secs(&self, seconds: i64) {
        self.advance(Duration::seconds(seconds));
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_dispatch_metadata_is_monotonic() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![TaskDefinition::interval(
            "report", "app.report", 60,
        )]);
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        repo.update_dispatch_metadata("report", t1, 5).await.unwrap();
        repo.update_dispatch_metadata("report", t1 - Duration::minutes(1), 3)
            .await
            .unwrap();

        let task = repo.get("report").unwrap();
        assert_eq!(task.last_run_at, Some(t1));
        assert_eq!(task.run_count, 5);
    }

    #[tokio::test]
    async fn test_injected_write_failures_are_consumed() {
        let repo = MockTaskDefinitionRepository::with_tasks(vec![TaskDefinition::interval(
            "report", "app.report", 60,
        )]);
        repo.fail_next_writes(1);

        assert!(repo.update_dispatch_metadata("report", Utc::now(), 1).await.is_err());
        assert!(repo.update_dispatch_metadata("report", Utc::now(), 1).await.is_ok());
        assert_eq!(repo.dispatch_write_count(), 1);
    }

    #[tokio::test]
    async fn test_queue_consumes_in_given_order() {
        let queue = MockMessageQueue::new();
        let low = crate::TaskMessageBuilder::new("low").build();
        let sys = crate::TaskMessageBuilder::new("sys").build();
        queue.publish_message(QueueName::PriorityLow, &low).await.unwrap();
        queue.publish_message(QueueName::System, &sys).await.unwrap();

        let next = queue
            .consume_next(&QueueName::CONSUMPTION_ORDER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.task_name, "sys");
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance_secs(90);
        assert_eq!(clock.now(), start + Duration::seconds(90));
    }
}
