use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres, QueryBuilder};
use uuid::Uuid;

use jobsync_core::error::AppError;
use jobsync_core::models::{
    AggregateStats, ImportErrorEntry, ImportRun, ImportType, NewImportRun, ProcessOutcome,
    RunStatus, TriggeredBy,
};
use jobsync_core::traits::{RunFilter, RunStore};

/// PostgreSQL-backed store for import runs.
///
/// All counter mutations are server-side increments guarded on
/// `status = 'in_progress'`; a mutation hitting a terminal run affects
/// zero rows and is logged as an anomaly instead of corrupting totals.
#[derive(Clone)]
pub struct RunRepository {
    pool: Pool<Postgres>,
}

impl RunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn warn_if_untouched(result: &sqlx::postgres::PgQueryResult, id: Uuid, op: &str) {
        if result.rows_affected() == 0 {
            tracing::warn!(run_id = %id, %op, "Mutation against terminal or unknown run rejected");
        }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ImportRunRow {
    id: Uuid,
    feed_url: String,
    status: String,
    total_fetched: i64,
    total_imported: i64,
    new_count: i64,
    updated_count: i64,
    failed_count: i64,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    errors: serde_json::Value,
    triggered_by: String,
    import_type: String,
}

impl From<ImportRunRow> for ImportRun {
    fn from(row: ImportRunRow) -> Self {
        let errors: Vec<ImportErrorEntry> =
            serde_json::from_value(row.errors).unwrap_or_default();
        ImportRun {
            id: row.id,
            feed_url: row.feed_url,
            status: row.status.parse().unwrap_or(RunStatus::InProgress),
            total_fetched: row.total_fetched as u64,
            total_imported: row.total_imported as u64,
            new_count: row.new_count as u64,
            updated_count: row.updated_count as u64,
            failed_count: row.failed_count as u64,
            start_time: row.start_time,
            end_time: row.end_time,
            duration_ms: row.duration_ms,
            errors,
            triggered_by: row.triggered_by.parse().unwrap_or(TriggeredBy::Manual),
            import_type: row.import_type.parse().unwrap_or(ImportType::Full),
        }
    }
}

impl RunStore for RunRepository {
    async fn create(&self, run: NewImportRun) -> Result<ImportRun, AppError> {
        let row = sqlx::query_as::<_, ImportRunRow>(
            r#"
            INSERT INTO import_runs (feed_url, triggered_by, import_type)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(&run.feed_url)
        .bind(run.triggered_by.as_str())
        .bind(run.import_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(row.into())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ImportRun>, AppError> {
        let row = sqlx::query_as::<_, ImportRunRow>(r#"SELECT * FROM import_runs WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn set_total_fetched(&self, id: Uuid, total: u64) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE import_runs
            SET total_fetched = $2
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(id)
        .bind(total as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Self::warn_if_untouched(&result, id, "set_total_fetched");
        Ok(())
    }

    async fn increment_counters(&self, id: Uuid, outcome: ProcessOutcome) -> Result<(), AppError> {
        let column = match outcome {
            ProcessOutcome::New => "new_count",
            ProcessOutcome::Updated => "updated_count",
        };
        let result = sqlx::query(&format!(
            r#"
            UPDATE import_runs
            SET {column} = {column} + 1, total_imported = total_imported + 1
            WHERE id = $1 AND status = 'in_progress'
            "#,
        ))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Self::warn_if_untouched(&result, id, "increment_counters");
        Ok(())
    }

    async fn append_error(&self, id: Uuid, entry: ImportErrorEntry) -> Result<(), AppError> {
        let entry = serde_json::to_value(&entry)?;
        let result = sqlx::query(
            r#"
            UPDATE import_runs
            SET errors = errors || $2::jsonb, failed_count = failed_count + 1
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(id)
        .bind(entry)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Self::warn_if_untouched(&result, id, "append_error");
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, entry: ImportErrorEntry) -> Result<(), AppError> {
        let entry = serde_json::to_value(&entry)?;
        let result = sqlx::query(
            r#"
            UPDATE import_runs
            SET status = 'failed',
                errors = errors || $2::jsonb,
                end_time = NOW(),
                duration_ms = (EXTRACT(EPOCH FROM (NOW() - start_time)) * 1000)::BIGINT
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(id)
        .bind(entry)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Self::warn_if_untouched(&result, id, "mark_failed");
        Ok(())
    }

    async fn complete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE import_runs
            SET status = 'completed',
                end_time = NOW(),
                duration_ms = (EXTRACT(EPOCH FROM (NOW() - start_time)) * 1000)::BIGINT
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, filter: &RunFilter) -> Result<(Vec<ImportRun>, u64), AppError> {
        let mut count_query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM import_runs WHERE TRUE");
        push_filters(&mut count_query, filter);
        let (total,): (i64,) = count_query
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;

        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM import_runs WHERE TRUE");
        push_filters(&mut query, filter);
        query.push(" ORDER BY start_time DESC");
        if filter.per_page > 0 {
            let offset = (filter.page.max(1) - 1) * filter.per_page;
            query.push(" LIMIT ").push_bind(filter.per_page as i64);
            query.push(" OFFSET ").push_bind(offset as i64);
        }
        let rows: Vec<ImportRunRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok((rows.into_iter().map(Into::into).collect(), total as u64))
    }

    async fn aggregate_stats(&self) -> Result<AggregateStats, AppError> {
        let row = sqlx::query_as::<_, AggregateRow>(
            r#"
            SELECT COUNT(*) AS total_runs,
                   COUNT(*) FILTER (WHERE status = 'completed') AS completed_runs,
                   COUNT(*) FILTER (WHERE status = 'failed') AS failed_runs,
                   COUNT(*) FILTER (WHERE status = 'in_progress') AS in_progress_runs,
                   COALESCE(SUM(total_imported), 0)::BIGINT AS total_imported,
                   COALESCE(SUM(new_count), 0)::BIGINT AS total_new,
                   COALESCE(SUM(updated_count), 0)::BIGINT AS total_updated,
                   COALESCE(SUM(failed_count), 0)::BIGINT AS total_failed,
                   COALESCE(AVG(duration_ms) FILTER (WHERE status = 'completed'), 0)::FLOAT8
                       AS average_duration_ms
            FROM import_runs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(AggregateStats {
            total_runs: row.total_runs as u64,
            completed_runs: row.completed_runs as u64,
            failed_runs: row.failed_runs as u64,
            in_progress_runs: row.in_progress_runs as u64,
            total_imported: row.total_imported as u64,
            total_new: row.total_new as u64,
            total_updated: row.total_updated as u64,
            total_failed: row.total_failed as u64,
            average_duration_ms: row.average_duration_ms,
        })
    }
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &RunFilter) {
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(feed) = &filter.feed_contains {
        query
            .push(" AND feed_url LIKE ")
            .push_bind(format!("%{feed}%"));
    }
    if let Some(after) = filter.start_after {
        query.push(" AND start_time >= ").push_bind(after);
    }
    if let Some(before) = filter.start_before {
        query.push(" AND start_time <= ").push_bind(before);
    }
}

#[derive(sqlx::FromRow)]
struct AggregateRow {
    total_runs: i64,
    completed_runs: i64,
    failed_runs: i64,
    in_progress_runs: i64,
    total_imported: i64,
    total_new: i64,
    total_updated: i64,
    total_failed: i64,
    average_duration_ms: f64,
}
