use crate::error::AppError;
use crate::models::{JobRecord, ProcessOutcome};
use crate::traits::JobStore;

/// Validates and upserts normalized records.
///
/// Validation failures are permanent and produce no persistence side
/// effects; store failures are transient and left to the task queue's
/// retry machinery. The upsert itself is idempotent: replaying a task
/// re-applies the same fields to the same identity.
#[derive(Clone)]
pub struct RecordProcessor<S>
where
    S: JobStore,
{
    store: S,
}

impl<S> RecordProcessor<S>
where
    S: JobStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Validate, resolve identity, and insert-or-update.
    pub async fn process(&self, record: &JobRecord) -> Result<ProcessOutcome, AppError> {
        validate(record)?;

        let (stored, was_inserted) = self.store.upsert(record).await?;
        if was_inserted {
            tracing::debug!(title = %stored.title, company = %stored.company, "Created job");
            Ok(ProcessOutcome::New)
        } else {
            tracing::debug!(title = %stored.title, company = %stored.company, "Updated job");
            Ok(ProcessOutcome::Updated)
        }
    }
}

/// Required-field checks: title, company, location, url, source must be
/// non-empty after trimming.
fn validate(record: &JobRecord) -> Result<(), AppError> {
    let checks: [(&'static str, &str); 5] = [
        ("title", &record.title),
        ("company", &record.company),
        ("location", &record.location),
        ("url", &record.url),
        ("source", &record.source),
    ];
    for (field, value) in checks {
        if value.trim().is_empty() {
            return Err(AppError::Validation { field });
        }
    }
    Ok(())
}
