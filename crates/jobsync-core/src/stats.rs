use uuid::Uuid;

use crate::error::AppError;
use crate::models::{AggregateStats, ImportErrorEntry, ImportRun, ProcessOutcome, RunStatus};
use crate::traits::{ProgressEvent, ProgressSink, RunStore};

/// Run-level counter and statistics aggregation over a [`RunStore`].
///
/// All counter mutations go through the store's atomic increment
/// operations — never read-modify-write in handler memory, which loses
/// updates under concurrent workers.
#[derive(Clone)]
pub struct StatsService<R>
where
    R: RunStore,
{
    runs: R,
}

impl<R> StatsService<R>
where
    R: RunStore,
{
    pub fn new(runs: R) -> Self {
        Self { runs }
    }

    /// Count one terminal `new`/`updated` outcome (bumps `total_imported`
    /// as well). Failed outcomes go through [`Self::record_error`] instead.
    pub async fn increment_counters(
        &self,
        run_id: Uuid,
        outcome: ProcessOutcome,
    ) -> Result<(), AppError> {
        self.runs.increment_counters(run_id, outcome).await
    }

    /// Append an error entry and bump `failed_count`.
    pub async fn record_error(
        &self,
        run_id: Uuid,
        entry: ImportErrorEntry,
    ) -> Result<(), AppError> {
        self.runs.append_error(run_id, entry).await
    }

    /// Idempotent `in_progress -> completed` transition. Returns `true`
    /// only for the call that performed the transition.
    pub async fn complete_run(&self, run_id: Uuid) -> Result<bool, AppError> {
        let transitioned = self.runs.complete(run_id).await?;
        if transitioned {
            tracing::info!(%run_id, "Import run completed");
        }
        Ok(transitioned)
    }

    /// Queue-drain detection: once every fetched record has reached a
    /// terminal outcome, complete the run and publish the completion event.
    /// The conditional store transition makes this safe to call after every
    /// task — only one caller wins.
    pub async fn check_drained<P: ProgressSink>(
        &self,
        run_id: Uuid,
        sink: &P,
    ) -> Result<(), AppError> {
        let Some(run) = self.runs.get(run_id).await? else {
            tracing::warn!(%run_id, "Drain check for unknown run");
            return Ok(());
        };

        sink.publish(ProgressEvent::Progress {
            run_id,
            processed: run.processed(),
            total: run.total_fetched,
            status: run.status,
        });

        if run.status == RunStatus::InProgress && run.processed() >= run.total_fetched {
            if self.complete_run(run_id).await? {
                if let Some(completed) = self.runs.get(run_id).await? {
                    self.publish_completed(&completed, sink);
                }
            }
        }
        Ok(())
    }

    fn publish_completed<P: ProgressSink>(&self, run: &ImportRun, sink: &P) {
        sink.publish(ProgressEvent::Completed {
            run_id: run.id,
            total_imported: run.total_imported,
            new_count: run.new_count,
            updated_count: run.updated_count,
            failed_count: run.failed_count,
            duration_ms: run.duration_ms.unwrap_or(0),
        });
    }

    /// Cross-run statistics: run counts by status, counter sums, and
    /// average duration across completed runs only.
    pub async fn aggregate_stats(&self) -> Result<AggregateStats, AppError> {
        self.runs.aggregate_stats().await
    }
}
