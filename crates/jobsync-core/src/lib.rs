pub mod config;
pub mod error;
pub mod fetch;
pub mod import;
pub mod models;
pub mod normalize;
pub mod process;
pub mod stats;
pub mod task;
pub mod traits;
pub mod worker;

#[cfg(test)]
pub mod testutil;

pub use config::ImportConfig;
pub use error::AppError;
pub use fetch::TrackedFetcher;
pub use import::ImportService;
pub use models::{
    compute_hash, AggregateStats, FeedHealth, ImportErrorEntry, ImportRun, ImportType,
    JobIdentity, JobRecord, NewImportRun, ProcessOutcome, RunStatus, TriggeredBy,
};
pub use process::RecordProcessor;
pub use stats::StatsService;
pub use task::{ImportTask, NewImportTask, RetryConfig, TaskStatus, WorkerConfig};
pub use traits::{
    FeedFetcher, FeedHealthStore, JobStore, NullSink, ProgressEvent, ProgressSink, RunFilter,
    RunStore, TaskQueue, TracingSink,
};
pub use worker::WorkerPool;
