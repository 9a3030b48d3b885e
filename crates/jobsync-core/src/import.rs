use crate::config::ImportConfig;
use crate::error::AppError;
use crate::models::{ImportErrorEntry, ImportRun, ImportType, NewImportRun, TriggeredBy};
use crate::normalize::normalize;
use crate::stats::StatsService;
use crate::task::NewImportTask;
use crate::traits::{FeedFetcher, ProgressEvent, ProgressSink, RunStore, TaskQueue};

/// Per-run import coordinator: fetch, normalize, batch, enqueue.
///
/// Each configured feed gets its own run and its own failure domain — a
/// dead feed marks its run failed and the trigger moves on to the next
/// feed. The orchestrator never completes a non-empty run; completion
/// happens at queue drain, on the worker side.
#[derive(Clone)]
pub struct ImportService<F, Q, R, P>
where
    F: FeedFetcher,
    Q: TaskQueue,
    R: RunStore,
    P: ProgressSink,
{
    fetcher: F,
    queue: Q,
    runs: R,
    stats: StatsService<R>,
    sink: P,
    config: ImportConfig,
}

impl<F, Q, R, P> ImportService<F, Q, R, P>
where
    F: FeedFetcher,
    Q: TaskQueue,
    R: RunStore,
    P: ProgressSink,
{
    pub fn new(fetcher: F, queue: Q, runs: R, sink: P, config: ImportConfig) -> Self {
        let stats = StatsService::new(runs.clone());
        Self {
            fetcher,
            queue,
            runs,
            stats,
            sink,
            config,
        }
    }

    /// Trigger an import across all configured feeds. Returns one run per
    /// feed that got as far as run creation; feed failures are recorded on
    /// their runs, never propagated.
    pub async fn trigger_import(
        &self,
        triggered_by: TriggeredBy,
        import_type: ImportType,
    ) -> Vec<ImportRun> {
        tracing::info!(%triggered_by, %import_type, feeds = self.config.feed_urls.len(),
            "Starting import");

        let mut runs = Vec::new();
        for feed_url in &self.config.feed_urls {
            match self.import_feed(feed_url, triggered_by, import_type).await {
                Ok(run) => runs.push(run),
                Err(e) => {
                    // Run creation itself failed; nothing to record against.
                    tracing::error!(%feed_url, error = %e, "Failed to import feed");
                }
            }
        }

        tracing::info!(runs = runs.len(), "Import accepted for processing");
        runs
    }

    /// Import a single feed: create run, fetch, normalize, enqueue batches.
    pub async fn import_feed(
        &self,
        feed_url: &str,
        triggered_by: TriggeredBy,
        import_type: ImportType,
    ) -> Result<ImportRun, AppError> {
        let run = self
            .runs
            .create(NewImportRun {
                feed_url: feed_url.to_string(),
                triggered_by,
                import_type,
            })
            .await?;

        // Any failure past run creation must leave the run terminal: a run
        // with no failure record (or with accepted tasks it cannot account
        // for) would sit in_progress forever.
        if let Err(e) = self.fetch_and_enqueue(&run, feed_url).await {
            tracing::error!(%feed_url, run_id = %run.id, error = %e, "Import failed");
            let entry = ImportErrorEntry::new(e.to_string()).with_trace(format!("{e:?}"));
            self.runs.mark_failed(run.id, entry).await?;
            self.sink.publish(ProgressEvent::Failed {
                run_id: run.id,
                error: e.to_string(),
            });
        }

        self.runs
            .get(run.id)
            .await?
            .ok_or_else(|| AppError::Persistence("run vanished".into()))
    }

    async fn fetch_and_enqueue(&self, run: &ImportRun, feed_url: &str) -> Result<(), AppError> {
        let items = self.fetcher.fetch(feed_url).await?;

        self.runs
            .set_total_fetched(run.id, items.len() as u64)
            .await?;

        let records: Vec<_> = items
            .iter()
            .map(|item| normalize(item, feed_url))
            .collect();

        // Intra-run duplicates (same dedup key twice in one payload) would
        // never drain: the queue keeps one task but the run expects two
        // outcomes. Skip them here and count each against the run.
        let mut seen = std::collections::HashSet::new();
        let mut tasks = Vec::with_capacity(records.len());
        for record in records {
            let task = NewImportTask::new(run.id, record, self.config.max_attempts);
            if seen.insert(task.dedup_key.clone()) {
                tasks.push(task);
            } else {
                tracing::warn!(run_id = %run.id, dedup_key = %task.dedup_key,
                    "Duplicate record in feed payload, skipping");
                let entry = ImportErrorEntry::new("Duplicate record in feed payload")
                    .with_record_id(task.record.source_id.clone());
                self.stats.record_error(run.id, entry).await?;
            }
        }

        if tasks.is_empty() {
            // No tasks will ever drain this run; complete it here.
            self.stats.check_drained(run.id, &self.sink).await?;
        } else {
            let count = tasks.len();
            let mut iter = tasks.into_iter();
            loop {
                let batch: Vec<_> = iter.by_ref().take(self.config.batch_size).collect();
                if batch.is_empty() {
                    break;
                }
                self.queue.enqueue_bulk(batch).await?;
            }
            tracing::info!(%feed_url, run_id = %run.id, count,
                "Queued records for processing");
        }

        Ok(())
    }
}
