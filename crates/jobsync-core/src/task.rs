use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::JobRecord;

/// Status of an import task in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "active" => Ok(TaskStatus::Active),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Unknown task status: {s}")),
        }
    }
}

/// Retry configuration with exponential backoff.
///
/// Delay for attempt `n` (0-indexed) is `base_delay * 2^n`, capped at
/// `max_delay`. Tasks exhausting `max_attempts` are dead-lettered.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: TimeDelta,
    pub max_delay: TimeDelta,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: TimeDelta::milliseconds(2000),
            max_delay: TimeDelta::minutes(5),
        }
    }
}

impl RetryConfig {
    /// Backoff delay after a given number of completed attempts.
    pub fn delay_for_attempt(&self, attempt: u32) -> TimeDelta {
        let factor = 2i64.saturating_pow(attempt.min(20));
        let delay = self
            .base_delay
            .checked_mul(factor as i32)
            .unwrap_or(self.max_delay);
        std::cmp::min(delay, self.max_delay)
    }
}

/// A queued unit of work: one normalized record bound to its import run.
///
/// `run_id` is a reference, not ownership — the run record outlives its
/// tasks and is queried independently of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportTask {
    pub id: Uuid,
    pub run_id: Uuid,
    /// Queue identity: prevents duplicate enqueue of the same
    /// (run, source-record) pair.
    pub dedup_key: String,
    pub record: JobRecord,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportTask {
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn next_retry(&self, config: &RetryConfig) -> DateTime<Utc> {
        Utc::now() + config.delay_for_attempt(self.attempts)
    }
}

/// Request to enqueue a task.
#[derive(Debug, Clone)]
pub struct NewImportTask {
    pub run_id: Uuid,
    pub dedup_key: String,
    pub record: JobRecord,
    pub max_attempts: u32,
}

impl NewImportTask {
    pub fn new(run_id: Uuid, record: JobRecord, max_attempts: u32) -> Self {
        let dedup_key = record.dedup_key(run_id);
        Self {
            run_id,
            dedup_key,
            record,
            max_attempts,
        }
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bounded number of concurrent task handlers.
    pub concurrency: usize,
    pub worker_id: String,
    pub poll_interval: Duration,
    pub retry_config: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            poll_interval: Duration::from_millis(200),
            retry_config: RetryConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }
}
