use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::ImportErrorEntry;
use crate::process::RecordProcessor;
use crate::stats::StatsService;
use crate::task::{ImportTask, WorkerConfig};
use crate::traits::{JobStore, ProgressSink, RunStore, TaskQueue};

/// Bounded pool of task handlers pulling from the shared queue.
///
/// Each of the N loops claims a task, processes it, and reports the
/// terminal outcome. Counter increments are gated on the queue's
/// first-transition signal, so a task replayed after a partial success
/// (upsert durable, completion lost) counts at most once per terminal
/// outcome. Cancellation stops claiming and releases in-flight claims;
/// completed upserts are not rolled back.
pub struct WorkerPool<Q, S, R, P>
where
    Q: TaskQueue + 'static,
    S: JobStore + 'static,
    R: RunStore + 'static,
    P: ProgressSink + 'static,
{
    queue: Q,
    processor: RecordProcessor<S>,
    stats: StatsService<R>,
    sink: P,
    config: WorkerConfig,
}

impl<Q, S, R, P> WorkerPool<Q, S, R, P>
where
    Q: TaskQueue + 'static,
    S: JobStore + 'static,
    R: RunStore + 'static,
    P: ProgressSink + 'static,
{
    pub fn new(queue: Q, job_store: S, run_store: R, sink: P, config: WorkerConfig) -> Self {
        Self {
            queue,
            processor: RecordProcessor::new(job_store),
            stats: StatsService::new(run_store),
            sink,
            config,
        }
    }

    /// Run N worker loops until cancellation.
    pub async fn run(&self, cancel_token: CancellationToken) -> Result<(), AppError> {
        let concurrency = self.config.concurrency.max(1);
        tracing::info!(worker_id = %self.config.worker_id, %concurrency, "Worker pool started");

        let mut handles = Vec::with_capacity(concurrency);
        for i in 0..concurrency {
            let worker = Worker {
                queue: self.queue.clone(),
                processor: self.processor.clone(),
                stats: self.stats.clone(),
                sink: self.sink.clone(),
                config: self.config.clone(),
                loop_id: format!("{}-{i}", self.config.worker_id),
            };
            let token = cancel_token.clone();
            handles.push(tokio::spawn(async move { worker.run(token).await }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker loop panicked");
            }
        }

        // Graceful shutdown: release anything still claimed under this pool's id.
        let released = self
            .queue
            .release_worker_tasks(&self.config.worker_id)
            .await
            .unwrap_or(0);
        tracing::info!(worker_id = %self.config.worker_id, %released, "Worker pool stopped");

        Ok(())
    }
}

struct Worker<Q, S, R, P>
where
    Q: TaskQueue,
    S: JobStore,
    R: RunStore,
    P: ProgressSink,
{
    queue: Q,
    processor: RecordProcessor<S>,
    stats: StatsService<R>,
    sink: P,
    config: WorkerConfig,
    loop_id: String,
}

impl<Q, S, R, P> Worker<Q, S, R, P>
where
    Q: TaskQueue,
    S: JobStore,
    R: RunStore,
    P: ProgressSink,
{
    async fn run(&self, cancel_token: CancellationToken) {
        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            match self.queue.claim(&self.loop_id).await {
                Ok(Some(task)) => {
                    self.handle_task(&task).await;
                }
                Ok(None) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(worker = %self.loop_id, error = %e, "Failed to claim task");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        if let Err(e) = self.queue.release_worker_tasks(&self.loop_id).await {
            tracing::error!(worker = %self.loop_id, error = %e, "Failed to release claims");
        }
    }

    async fn handle_task(&self, task: &ImportTask) {
        tracing::debug!(task_id = %task.id, title = %task.record.title, "Processing task");

        match self.processor.process(&task.record).await {
            Ok(outcome) => {
                // Counters move only on the first completion of this task;
                // the upsert is already durable by this point.
                match self.queue.complete(task.id).await {
                    Ok(true) => {
                        if let Err(e) = self.stats.increment_counters(task.run_id, outcome).await {
                            tracing::error!(task_id = %task.id, error = %e,
                                "Failed to increment run counters");
                        }
                        self.drain_check(task).await;
                    }
                    Ok(false) => {
                        tracing::warn!(task_id = %task.id,
                            "Task already terminal, outcome not re-counted");
                    }
                    Err(e) => {
                        tracing::error!(task_id = %task.id, error = %e,
                            "Failed to mark task completed");
                    }
                }
            }
            Err(e) if !e.is_retryable() => {
                // Permanent: record once, never retry.
                self.fail_task(task, &e, false).await;
            }
            Err(e) => {
                let will_retry = task.can_retry();
                tracing::warn!(task_id = %task.id, error = %e, %will_retry, "Task failed");
                self.fail_task(task, &e, will_retry).await;
            }
        }
    }

    async fn fail_task(&self, task: &ImportTask, error: &AppError, retry: bool) {
        let next_retry_at = retry.then(|| task.next_retry(&self.config.retry_config));

        match self
            .queue
            .fail(task.id, &error.to_string(), next_retry_at)
            .await
        {
            Ok(true) => {
                // First transition to dead-lettered/permanent failure.
                let entry = ImportErrorEntry::new(error.to_string())
                    .with_record_id(task.record.source_id.clone());
                if let Err(e) = self.stats.record_error(task.run_id, entry).await {
                    tracing::error!(task_id = %task.id, error = %e,
                        "Failed to record run error");
                }
                self.drain_check(task).await;
            }
            Ok(false) => {
                // Re-queued for retry, or already terminal; nothing to count.
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "Failed to mark task failed");
            }
        }
    }

    async fn drain_check(&self, task: &ImportTask) {
        if let Err(e) = self.stats.check_drained(task.run_id, &self.sink).await {
            tracing::error!(run_id = %task.run_id, error = %e, "Drain check failed");
        }
    }
}
