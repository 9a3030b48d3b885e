use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    AggregateStats, FeedHealth, ImportErrorEntry, ImportRun, JobIdentity, JobRecord, NewImportRun,
    ProcessOutcome, RunStatus,
};
use crate::task::{ImportTask, NewImportTask, TaskStatus};

/// Fetches raw feed items from a feed URL.
///
/// A "raw item" is the schema-agnostic tree parsed out of the feed payload;
/// the normalizer decides what shape it actually is.
pub trait FeedFetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Vec<serde_json::Value>, AppError>> + Send;
}

/// Persists canonical job records, keyed by [`JobIdentity`].
///
/// `upsert` must be atomic per identity: two workers racing on the same key
/// must never create two records.
pub trait JobStore: Send + Sync + Clone {
    fn find_by_identity(
        &self,
        identity: &JobIdentity,
    ) -> impl Future<Output = Result<Option<JobRecord>, AppError>> + Send;

    /// Insert-or-update by identity. Incoming fields win on conflict and
    /// the record's last-synced time is stamped. Returns the stored record
    /// and whether it was inserted (vs. updated).
    fn upsert(
        &self,
        record: &JobRecord,
    ) -> impl Future<Output = Result<(JobRecord, bool), AppError>> + Send;

    fn count(&self) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Filter for listing import runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    /// Substring match on the feed URL.
    pub feed_contains: Option<String>,
    pub start_after: Option<DateTime<Utc>>,
    pub start_before: Option<DateTime<Utc>>,
    pub page: u64,
    pub per_page: u64,
}

/// Durable store for [`ImportRun`] records.
///
/// Counter mutations are server-side atomic increments; implementations must
/// reject mutations against runs already in a terminal state (and log the
/// anomaly) rather than corrupting final totals.
pub trait RunStore: Send + Sync + Clone {
    fn create(
        &self,
        run: NewImportRun,
    ) -> impl Future<Output = Result<ImportRun, AppError>> + Send;

    fn get(&self, id: Uuid) -> impl Future<Output = Result<Option<ImportRun>, AppError>> + Send;

    fn set_total_fetched(
        &self,
        id: Uuid,
        total: u64,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Atomically bump the outcome counter plus `total_imported`.
    fn increment_counters(
        &self,
        id: Uuid,
        outcome: ProcessOutcome,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Append an error entry and atomically bump `failed_count`.
    fn append_error(
        &self,
        id: Uuid,
        entry: ImportErrorEntry,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Terminal transition used for feed-level failures. Stamps end time
    /// and duration; appends the given error entry.
    fn mark_failed(
        &self,
        id: Uuid,
        entry: ImportErrorEntry,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Conditional `in_progress -> completed` transition stamping end time
    /// and duration. Returns `true` only for the call that actually
    /// performed the transition; later calls are no-ops returning `false`.
    fn complete(&self, id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Filtered, paginated listing, newest first. Returns the page and the
    /// total match count.
    fn list(
        &self,
        filter: &RunFilter,
    ) -> impl Future<Output = Result<(Vec<ImportRun>, u64), AppError>> + Send;

    fn aggregate_stats(&self) -> impl Future<Output = Result<AggregateStats, AppError>> + Send;
}

/// Store for per-feed health records.
pub trait FeedHealthStore: Send + Sync + Clone {
    fn find_by_url(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Option<FeedHealth>, AppError>> + Send;

    fn upsert(&self, health: &FeedHealth) -> impl Future<Output = Result<(), AppError>> + Send;

    fn list(&self) -> impl Future<Output = Result<Vec<FeedHealth>, AppError>> + Send;
}

/// Durable, at-least-once task queue.
///
/// Implementations must support atomic claiming (`FOR UPDATE SKIP LOCKED`
/// or equivalent) so no two workers process the same task, and must retain
/// dead-lettered tasks for inspection/manual retry rather than discarding
/// them.
pub trait TaskQueue: Send + Sync + Clone {
    /// Bulk enqueue. Tasks whose `dedup_key` is already present are
    /// silently skipped. Returns the number actually enqueued.
    fn enqueue_bulk(
        &self,
        tasks: Vec<NewImportTask>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Atomically claim the next runnable task. `None` when the queue has
    /// no task ready (pending and past its retry delay).
    fn claim(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<Option<ImportTask>, AppError>> + Send;

    /// Mark a task completed. Returns `true` only for the first transition
    /// to a terminal state — callers gate counter increments on it.
    fn complete(&self, task_id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Mark a task failed. With `next_retry_at` the task is re-queued for
    /// retry and `false` is returned; without it the task is dead-lettered
    /// and `true` is returned on the first transition to `failed`.
    fn fail(
        &self,
        task_id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Release all tasks claimed by a worker (graceful shutdown).
    fn release_worker_tasks(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn count_by_status(
        &self,
        status: TaskStatus,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Re-queue dead-lettered tasks of a run for another round of attempts.
    fn retry_failed(&self, run_id: Uuid) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Drop completed tasks older than the cutoff. Failed tasks are kept.
    fn prune_completed(
        &self,
        older_than: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Progress/completion/failure events emitted during an import.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress {
        run_id: Uuid,
        processed: u64,
        total: u64,
        status: RunStatus,
    },
    Completed {
        run_id: Uuid,
        total_imported: u64,
        new_count: u64,
        updated_count: u64,
        failed_count: u64,
        duration_ms: i64,
    },
    Failed {
        run_id: Uuid,
        error: String,
    },
}

/// Publish sink for [`ProgressEvent`]s.
///
/// Delivery is best-effort and fire-and-forget: the pipeline never blocks
/// on, or retries, event delivery, so `publish` is infallible by contract.
pub trait ProgressSink: Send + Sync + Clone {
    fn publish(&self, event: ProgressEvent) {
        let _ = event;
    }
}

/// Sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {}

/// Sink that logs events via `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn publish(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Progress {
                run_id,
                processed,
                total,
                status,
            } => {
                tracing::debug!(%run_id, %processed, %total, %status, "Import progress");
            }
            ProgressEvent::Completed {
                run_id,
                total_imported,
                new_count,
                updated_count,
                failed_count,
                duration_ms,
            } => {
                tracing::info!(
                    %run_id, %total_imported, %new_count, %updated_count,
                    %failed_count, %duration_ms, "Import completed"
                );
            }
            ProgressEvent::Failed { run_id, error } => {
                tracing::warn!(%run_id, %error, "Import failed");
            }
        }
    }
}
