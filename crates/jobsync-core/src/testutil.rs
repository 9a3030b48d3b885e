//! In-memory fakes for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    AggregateStats, FeedHealth, ImportErrorEntry, ImportRun, JobIdentity, JobRecord, NewImportRun,
    ProcessOutcome, RunStatus,
};
use crate::task::{ImportTask, NewImportTask, TaskStatus};
use crate::traits::{
    FeedFetcher, FeedHealthStore, JobStore, ProgressEvent, ProgressSink, RunFilter, RunStore,
    TaskQueue,
};

/// A valid record with defaults for everything but the identity triple.
pub fn make_test_record(title: &str, company: &str, location: &str) -> JobRecord {
    JobRecord {
        title: title.to_string(),
        company: company.to_string(),
        location: location.to_string(),
        description: "A job".to_string(),
        salary: None,
        job_type: Some("full-time".to_string()),
        category: Some("general".to_string()),
        url: format!("https://jobs.example.com/{}", title.replace(' ', "-")),
        company_url: None,
        posted_date: None,
        expiry_date: None,
        source: "https://jobs.example.com/feed".to_string(),
        source_id: None,
    }
}

/// Scripted fetcher: either a fixed item set served on every call, or a
/// queue of one-shot responses consumed in order.
#[derive(Clone)]
pub struct MockFeedFetcher {
    scripted: Arc<Mutex<VecDeque<Result<Vec<serde_json::Value>, AppError>>>>,
    fixed: Option<Vec<serde_json::Value>>,
}

impl MockFeedFetcher {
    pub fn with_items(items: Vec<serde_json::Value>) -> Self {
        Self {
            scripted: Arc::new(Mutex::new(VecDeque::new())),
            fixed: Some(items),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<Vec<serde_json::Value>, AppError>>) -> Self {
        Self {
            scripted: Arc::new(Mutex::new(responses.into())),
            fixed: None,
        }
    }
}

impl FeedFetcher for MockFeedFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<serde_json::Value>, AppError> {
        if let Some(response) = self.scripted.lock().unwrap().pop_front() {
            return response;
        }
        match &self.fixed {
            Some(items) => Ok(items.clone()),
            None => Err(AppError::Network("no scripted response left".into())),
        }
    }
}

/// Job store backed by a map keyed by [`JobIdentity`]. The upsert runs
/// under one lock, so racing workers see the same atomicity as the real
/// store. Can be told to fail the first N upserts.
#[derive(Clone)]
pub struct InMemoryJobStore {
    jobs: Arc<Mutex<HashMap<JobIdentity, JobRecord>>>,
    failures_left: Arc<Mutex<u32>>,
}

impl InMemoryJobStore {
    pub fn empty() -> Self {
        Self::failing_times(0)
    }

    pub fn failing_times(n: u32) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            failures_left: Arc::new(Mutex::new(n)),
        }
    }
}

impl JobStore for InMemoryJobStore {
    async fn find_by_identity(
        &self,
        identity: &JobIdentity,
    ) -> Result<Option<JobRecord>, AppError> {
        Ok(self.jobs.lock().unwrap().get(identity).cloned())
    }

    async fn upsert(&self, record: &JobRecord) -> Result<(JobRecord, bool), AppError> {
        {
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::Persistence("injected store failure".into()));
            }
        }

        let mut jobs = self.jobs.lock().unwrap();
        let was_inserted = jobs.insert(record.identity(), record.clone()).is_none();
        Ok((record.clone(), was_inserted))
    }

    async fn count(&self) -> Result<u64, AppError> {
        Ok(self.jobs.lock().unwrap().len() as u64)
    }
}

/// Run store mirroring the persistence semantics the pipeline relies on:
/// atomic counter bumps, terminal-state guards, conditional completion.
#[derive(Clone)]
pub struct InMemoryRunStore {
    runs: Arc<Mutex<HashMap<Uuid, ImportRun>>>,
}

impl InMemoryRunStore {
    pub fn empty() -> Self {
        Self {
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn with_active_run<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut ImportRun) -> T,
    ) -> Result<Option<T>, AppError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| AppError::Persistence(format!("unknown run {id}")))?;
        if run.status.is_terminal() {
            tracing::warn!(run_id = %id, status = %run.status,
                "Mutation against terminal run rejected");
            return Ok(None);
        }
        Ok(Some(f(run)))
    }
}

impl RunStore for InMemoryRunStore {
    async fn create(&self, new_run: NewImportRun) -> Result<ImportRun, AppError> {
        let run = ImportRun {
            id: Uuid::new_v4(),
            feed_url: new_run.feed_url,
            status: RunStatus::InProgress,
            total_fetched: 0,
            total_imported: 0,
            new_count: 0,
            updated_count: 0,
            failed_count: 0,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            errors: Vec::new(),
            triggered_by: new_run.triggered_by,
            import_type: new_run.import_type,
        };
        self.runs.lock().unwrap().insert(run.id, run.clone());
        Ok(run)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ImportRun>, AppError> {
        Ok(self.runs.lock().unwrap().get(&id).cloned())
    }

    async fn set_total_fetched(&self, id: Uuid, total: u64) -> Result<(), AppError> {
        self.with_active_run(id, |run| run.total_fetched = total)?;
        Ok(())
    }

    async fn increment_counters(&self, id: Uuid, outcome: ProcessOutcome) -> Result<(), AppError> {
        self.with_active_run(id, |run| {
            match outcome {
                ProcessOutcome::New => run.new_count += 1,
                ProcessOutcome::Updated => run.updated_count += 1,
            }
            run.total_imported += 1;
        })?;
        Ok(())
    }

    async fn append_error(&self, id: Uuid, entry: ImportErrorEntry) -> Result<(), AppError> {
        self.with_active_run(id, |run| {
            run.errors.push(entry);
            run.failed_count += 1;
        })?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, entry: ImportErrorEntry) -> Result<(), AppError> {
        self.with_active_run(id, |run| {
            run.errors.push(entry);
            run.status = RunStatus::Failed;
            let now = Utc::now();
            run.end_time = Some(now);
            run.duration_ms = Some((now - run.start_time).num_milliseconds());
        })?;
        Ok(())
    }

    async fn complete(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self
            .with_active_run(id, |run| {
                run.status = RunStatus::Completed;
                let now = Utc::now();
                run.end_time = Some(now);
                run.duration_ms = Some((now - run.start_time).num_milliseconds());
            })?
            .is_some())
    }

    async fn list(&self, filter: &RunFilter) -> Result<(Vec<ImportRun>, u64), AppError> {
        let runs = self.runs.lock().unwrap();
        let mut matches: Vec<_> = runs
            .values()
            .filter(|run| {
                filter.status.is_none_or(|s| run.status == s)
                    && filter
                        .feed_contains
                        .as_deref()
                        .is_none_or(|f| run.feed_url.contains(f))
                    && filter.start_after.is_none_or(|t| run.start_time >= t)
                    && filter.start_before.is_none_or(|t| run.start_time <= t)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        let total = matches.len() as u64;
        if filter.per_page > 0 {
            let offset = (filter.page.max(1) - 1) * filter.per_page;
            matches = matches
                .into_iter()
                .skip(offset as usize)
                .take(filter.per_page as usize)
                .collect();
        }
        Ok((matches, total))
    }

    async fn aggregate_stats(&self) -> Result<AggregateStats, AppError> {
        let runs = self.runs.lock().unwrap();
        let mut stats = AggregateStats::default();
        let mut completed_duration_total = 0i64;

        for run in runs.values() {
            stats.total_runs += 1;
            match run.status {
                RunStatus::Completed => {
                    stats.completed_runs += 1;
                    completed_duration_total += run.duration_ms.unwrap_or(0);
                }
                RunStatus::Failed => stats.failed_runs += 1,
                RunStatus::InProgress => stats.in_progress_runs += 1,
            }
            stats.total_imported += run.total_imported;
            stats.total_new += run.new_count;
            stats.total_updated += run.updated_count;
            stats.total_failed += run.failed_count;
        }

        if stats.completed_runs > 0 {
            stats.average_duration_ms =
                completed_duration_total as f64 / stats.completed_runs as f64;
        }
        Ok(stats)
    }
}

/// Feed health store over a map keyed by URL. Can be told to fail upserts.
#[derive(Clone)]
pub struct InMemoryHealthStore {
    feeds: Arc<Mutex<HashMap<String, FeedHealth>>>,
    fail_upserts: bool,
}

impl InMemoryHealthStore {
    pub fn empty() -> Self {
        Self {
            feeds: Arc::new(Mutex::new(HashMap::new())),
            fail_upserts: false,
        }
    }

    pub fn with_upsert_error() -> Self {
        Self {
            fail_upserts: true,
            ..Self::empty()
        }
    }
}

impl FeedHealthStore for InMemoryHealthStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<FeedHealth>, AppError> {
        Ok(self.feeds.lock().unwrap().get(url).cloned())
    }

    async fn upsert(&self, health: &FeedHealth) -> Result<(), AppError> {
        if self.fail_upserts {
            return Err(AppError::Persistence("injected health store failure".into()));
        }
        self.feeds
            .lock()
            .unwrap()
            .insert(health.url.clone(), health.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FeedHealth>, AppError> {
        let mut feeds: Vec<_> = self.feeds.lock().unwrap().values().cloned().collect();
        feeds.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(feeds)
    }
}

#[derive(Default)]
struct QueueInner {
    tasks: HashMap<Uuid, ImportTask>,
    dedup_keys: HashSet<String>,
    bulk_calls: usize,
    fail_enqueue_after: Option<usize>,
}

/// Task queue with the same claim/complete/fail semantics as the durable
/// one: single-claimer, dedup on enqueue, first-transition signals, retry
/// scheduling via `next_retry_at`.
#[derive(Clone)]
pub struct InMemoryTaskQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl InMemoryTaskQueue {
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner::default())),
        }
    }

    /// Queue whose `enqueue_bulk` succeeds `n` times, then fails.
    pub fn failing_enqueue_after(n: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                fail_enqueue_after: Some(n),
                ..QueueInner::default()
            })),
        }
    }

    /// Number of `enqueue_bulk` calls made so far.
    pub fn bulk_calls(&self) -> usize {
        self.inner.lock().unwrap().bulk_calls
    }
}

impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue_bulk(&self, tasks: Vec<NewImportTask>) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.bulk_calls += 1;
        if inner
            .fail_enqueue_after
            .is_some_and(|n| inner.bulk_calls > n)
        {
            return Err(AppError::Queue("injected queue failure".into()));
        }

        let mut enqueued = 0;
        for new_task in tasks {
            if !inner.dedup_keys.insert(new_task.dedup_key.clone()) {
                continue;
            }
            let now = Utc::now();
            let task = ImportTask {
                id: Uuid::new_v4(),
                run_id: new_task.run_id,
                dedup_key: new_task.dedup_key,
                record: new_task.record,
                status: TaskStatus::Pending,
                attempts: 0,
                max_attempts: new_task.max_attempts,
                next_retry_at: None,
                error_message: None,
                worker_id: None,
                created_at: now,
                updated_at: now,
            };
            inner.tasks.insert(task.id, task);
            enqueued += 1;
        }
        Ok(enqueued)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<ImportTask>, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let candidate = inner
            .tasks
            .values_mut()
            .filter(|t| {
                t.status == TaskStatus::Pending && t.next_retry_at.is_none_or(|at| at <= now)
            })
            .min_by_key(|t| t.created_at);

        Ok(candidate.map(|task| {
            task.status = TaskStatus::Active;
            task.worker_id = Some(worker_id.to_string());
            task.attempts += 1;
            task.updated_at = now;
            task.clone()
        }))
    }

    async fn complete(&self, task_id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| AppError::Queue(format!("unknown task {task_id}")))?;
        if task.status.is_terminal() {
            return Ok(false);
        }
        task.status = TaskStatus::Completed;
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn fail(
        &self,
        task_id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| AppError::Queue(format!("unknown task {task_id}")))?;
        if task.status.is_terminal() {
            return Ok(false);
        }

        task.error_message = Some(error.to_string());
        task.worker_id = None;
        task.updated_at = Utc::now();

        match next_retry_at {
            Some(at) => {
                task.status = TaskStatus::Pending;
                task.next_retry_at = Some(at);
                Ok(false)
            }
            None => {
                task.status = TaskStatus::Failed;
                Ok(true)
            }
        }
    }

    async fn release_worker_tasks(&self, worker_id: &str) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let mut released = 0;
        for task in inner.tasks.values_mut() {
            let claimed_by_worker = task
                .worker_id
                .as_deref()
                .is_some_and(|id| id == worker_id || id.starts_with(&format!("{worker_id}-")));
            if task.status == TaskStatus::Active && claimed_by_worker {
                task.status = TaskStatus::Pending;
                task.worker_id = None;
                task.updated_at = Utc::now();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn count_by_status(&self, status: TaskStatus) -> Result<i64, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tasks.values().filter(|t| t.status == status).count() as i64)
    }

    async fn retry_failed(&self, run_id: Uuid) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let mut requeued = 0;
        for task in inner.tasks.values_mut() {
            if task.run_id == run_id && task.status == TaskStatus::Failed {
                task.status = TaskStatus::Pending;
                task.attempts = 0;
                task.next_retry_at = None;
                task.error_message = None;
                task.updated_at = Utc::now();
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn prune_completed(&self, older_than: DateTime<Utc>) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let pruned: Vec<_> = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed && t.updated_at < older_than)
            .map(|t| (t.id, t.dedup_key.clone()))
            .collect();
        for (id, dedup_key) in &pruned {
            inner.tasks.remove(id);
            inner.dedup_keys.remove(dedup_key);
        }
        Ok(pruned.len() as u64)
    }
}

/// Sink that records every published event.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn completed_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Completed { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Failed { .. }))
            .count()
    }
}

impl ProgressSink for RecordingSink {
    fn publish(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_skips_duplicate_dedup_keys() {
        let queue = InMemoryTaskQueue::empty();
        let run_id = Uuid::new_v4();
        let record = make_test_record("Rust Engineer", "Acme", "Remote");

        let first = queue
            .enqueue_bulk(vec![NewImportTask::new(run_id, record.clone(), 3)])
            .await
            .unwrap();
        let second = queue
            .enqueue_bulk(vec![NewImportTask::new(run_id, record, 3)])
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(
            queue.count_by_status(TaskStatus::Pending).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_respects_retry_delay() {
        let queue = InMemoryTaskQueue::empty();
        let run_id = Uuid::new_v4();
        queue
            .enqueue_bulk(vec![NewImportTask::new(
                run_id,
                make_test_record("Rust Engineer", "Acme", "Remote"),
                3,
            )])
            .await
            .unwrap();

        let task = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(task.attempts, 1);
        assert!(queue.claim("w2").await.unwrap().is_none());

        // Failed with a future retry time: not claimable yet.
        let future = Utc::now() + chrono::TimeDelta::minutes(5);
        assert!(!queue.fail(task.id, "boom", Some(future)).await.unwrap());
        assert!(queue.claim("w2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn complete_and_dead_letter_signal_first_transition_only() {
        let queue = InMemoryTaskQueue::empty();
        let run_id = Uuid::new_v4();
        queue
            .enqueue_bulk(vec![
                NewImportTask::new(run_id, make_test_record("A", "Acme", "Remote"), 3),
                NewImportTask::new(run_id, make_test_record("B", "Acme", "Remote"), 3),
            ])
            .await
            .unwrap();

        let a = queue.claim("w1").await.unwrap().unwrap();
        assert!(queue.complete(a.id).await.unwrap());
        assert!(!queue.complete(a.id).await.unwrap());

        let b = queue.claim("w1").await.unwrap().unwrap();
        assert!(queue.fail(b.id, "boom", None).await.unwrap());
        assert!(!queue.fail(b.id, "boom", None).await.unwrap());
        assert!(!queue.complete(b.id).await.unwrap());
    }

    #[tokio::test]
    async fn retry_failed_requeues_dead_letters_fresh() {
        let queue = InMemoryTaskQueue::empty();
        let run_id = Uuid::new_v4();
        queue
            .enqueue_bulk(vec![NewImportTask::new(
                run_id,
                make_test_record("Rust Engineer", "Acme", "Remote"),
                3,
            )])
            .await
            .unwrap();

        let task = queue.claim("w1").await.unwrap().unwrap();
        queue.fail(task.id, "boom", None).await.unwrap();
        assert_eq!(queue.retry_failed(run_id).await.unwrap(), 1);

        let again = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(again.id, task.id);
        assert_eq!(again.attempts, 1);
        assert!(again.error_message.is_none());
    }

    #[tokio::test]
    async fn release_returns_claimed_tasks_to_pending() {
        let queue = InMemoryTaskQueue::empty();
        let run_id = Uuid::new_v4();
        queue
            .enqueue_bulk(vec![NewImportTask::new(
                run_id,
                make_test_record("Rust Engineer", "Acme", "Remote"),
                3,
            )])
            .await
            .unwrap();

        queue.claim("worker-abc-0").await.unwrap().unwrap();
        assert_eq!(queue.release_worker_tasks("worker-abc").await.unwrap(), 1);
        assert_eq!(
            queue.count_by_status(TaskStatus::Pending).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn prune_drops_old_completed_tasks_and_their_dedup_keys() {
        let queue = InMemoryTaskQueue::empty();
        let run_id = Uuid::new_v4();
        let record = make_test_record("Rust Engineer", "Acme", "Remote");
        queue
            .enqueue_bulk(vec![NewImportTask::new(run_id, record.clone(), 3)])
            .await
            .unwrap();

        let task = queue.claim("w1").await.unwrap().unwrap();
        queue.complete(task.id).await.unwrap();

        let cutoff = Utc::now() + chrono::TimeDelta::seconds(1);
        assert_eq!(queue.prune_completed(cutoff).await.unwrap(), 1);

        // Same dedup key can be enqueued again after pruning.
        assert_eq!(
            queue
                .enqueue_bulk(vec![NewImportTask::new(run_id, record, 3)])
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn run_store_rejects_mutations_after_terminal_state() {
        let store = InMemoryRunStore::empty();
        let run = store
            .create(NewImportRun {
                feed_url: "https://jobs.example.com/feed".into(),
                triggered_by: crate::models::TriggeredBy::Manual,
                import_type: crate::models::ImportType::Full,
            })
            .await
            .unwrap();

        assert!(store.complete(run.id).await.unwrap());
        store
            .increment_counters(run.id, ProcessOutcome::New)
            .await
            .unwrap();
        store
            .append_error(run.id, ImportErrorEntry::new("late"))
            .await
            .unwrap();

        let run = store.get(run.id).await.unwrap().unwrap();
        assert_eq!(run.total_imported, 0);
        assert_eq!(run.failed_count, 0);
        assert!(run.errors.is_empty());
    }
}
