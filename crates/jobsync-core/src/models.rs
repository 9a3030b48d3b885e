use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A canonical job posting produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub salary: Option<String>,
    pub job_type: Option<String>,
    pub category: Option<String>,
    pub url: String,
    pub company_url: Option<String>,
    pub posted_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    /// Feed URL this record came from.
    pub source: String,
    /// Stable identifier within the feed (guid / Atom id), when present.
    pub source_id: Option<String>,
}

impl JobRecord {
    /// Dedup identity: case-insensitive, trimmed (title, company, location).
    pub fn identity(&self) -> JobIdentity {
        JobIdentity::new(&self.title, &self.company, &self.location)
    }

    /// Queue dedup key for a (run, record) pair. Without a stable feed id
    /// the key is a hash over every field, so records differing anywhere
    /// stay distinct and only byte-identical duplicates collapse.
    pub fn dedup_key(&self, run_id: Uuid) -> String {
        match &self.source_id {
            Some(id) if !id.trim().is_empty() => format!("{run_id}-{}", id.trim()),
            _ => {
                let serialized = serde_json::to_string(self).unwrap_or_default();
                let token = compute_hash(&serialized);
                format!("{run_id}-{}", &token[..16])
            }
        }
    }
}

/// Lookup key for persisted job records.
///
/// Records differing only in letter case or surrounding whitespace for
/// title/company/location resolve to the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIdentity {
    pub title: String,
    pub company: String,
    pub location: String,
}

impl JobIdentity {
    pub fn new(title: &str, company: &str, location: &str) -> Self {
        Self {
            title: title.trim().to_lowercase(),
            company: company.trim().to_lowercase(),
            location: location.trim().to_lowercase(),
        }
    }
}

/// Status of an import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_progress" => Ok(RunStatus::InProgress),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("Unknown run status: {s}")),
        }
    }
}

/// What initiated an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Manual,
    Scheduled,
    Api,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggeredBy::Manual => "manual",
            TriggeredBy::Scheduled => "scheduled",
            TriggeredBy::Api => "api",
        }
    }
}

impl fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TriggeredBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(TriggeredBy::Manual),
            "scheduled" => Ok(TriggeredBy::Scheduled),
            "api" => Ok(TriggeredBy::Api),
            _ => Err(format!("Unknown trigger: {s}")),
        }
    }
}

/// Full re-import vs. incremental top-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportType {
    Full,
    Incremental,
}

impl ImportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportType::Full => "full",
            ImportType::Incremental => "incremental",
        }
    }
}

impl fmt::Display for ImportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ImportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(ImportType::Full),
            "incremental" => Ok(ImportType::Incremental),
            _ => Err(format!("Unknown import type: {s}")),
        }
    }
}

/// One entry in a run's error list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportErrorEntry {
    /// Source id of the offending record, when known.
    pub record_id: Option<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub trace: Option<String>,
}

impl ImportErrorEntry {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            record_id: None,
            reason: reason.into(),
            timestamp: Utc::now(),
            trace: None,
        }
    }

    pub fn with_record_id(mut self, id: Option<String>) -> Self {
        self.record_id = id;
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

/// One feed-fetch attempt and everything that happened to its records.
///
/// Invariant: `total_imported == new_count + updated_count`; `failed_count`
/// is tracked independently. Terminal status is set once and never reopened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: Uuid,
    /// Feed URL this run imported from.
    pub feed_url: String,
    pub status: RunStatus,
    pub total_fetched: u64,
    pub total_imported: u64,
    pub new_count: u64,
    pub updated_count: u64,
    pub failed_count: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub errors: Vec<ImportErrorEntry>,
    pub triggered_by: TriggeredBy,
    pub import_type: ImportType,
}

impl ImportRun {
    /// Records that have reached a terminal outcome so far.
    pub fn processed(&self) -> u64 {
        self.new_count + self.updated_count + self.failed_count
    }
}

/// Request to create a new import run.
#[derive(Debug, Clone)]
pub struct NewImportRun {
    pub feed_url: String,
    pub triggered_by: TriggeredBy,
    pub import_type: ImportType,
}

/// Per-feed fetch health, mutated after every fetch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedHealth {
    pub url: String,
    pub name: String,
    pub category: Option<String>,
    pub active: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub last_successful_fetch: Option<DateTime<Utc>>,
    pub fetch_count: u64,
    pub failure_count: u64,
    pub total_jobs_fetched: u64,
    pub average_jobs_per_fetch: u64,
    pub fetch_interval_minutes: u32,
    pub priority: u32,
}

impl FeedHealth {
    /// Fresh record for a feed seen for the first time.
    pub fn new(url: &str, name: &str, category: Option<String>) -> Self {
        Self {
            url: url.to_string(),
            name: name.to_string(),
            category,
            active: true,
            last_fetched_at: None,
            last_successful_fetch: None,
            fetch_count: 0,
            failure_count: 0,
            total_jobs_fetched: 0,
            average_jobs_per_fetch: 0,
            fetch_interval_minutes: 60,
            priority: 1,
        }
    }

    /// Apply the outcome of one fetch attempt.
    pub fn record_attempt(&mut self, item_count: u64, success: bool, now: DateTime<Utc>) {
        self.last_fetched_at = Some(now);
        self.fetch_count += 1;
        if success {
            self.last_successful_fetch = Some(now);
            self.total_jobs_fetched += item_count;
            // Integer average, rounded to nearest.
            self.average_jobs_per_fetch =
                (self.total_jobs_fetched + self.fetch_count / 2) / self.fetch_count;
        } else {
            self.failure_count += 1;
        }
    }
}

/// Terminal outcome of processing one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    New,
    Updated,
}

/// Cross-run statistics derived from completed/failed/in-progress runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_runs: u64,
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub in_progress_runs: u64,
    pub total_imported: u64,
    pub total_new: u64,
    pub total_updated: u64,
    pub total_failed: u64,
    /// Average duration across completed runs only.
    pub average_duration_ms: f64,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
