use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use jobsync_core::error::AppError;
use jobsync_core::models::FeedHealth;
use jobsync_core::traits::FeedHealthStore;

/// PostgreSQL-backed store for per-feed health records.
#[derive(Clone)]
pub struct FeedRepository {
    pool: Pool<Postgres>,
}

impl FeedRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct FeedHealthRow {
    url: String,
    name: String,
    category: Option<String>,
    active: bool,
    last_fetched_at: Option<DateTime<Utc>>,
    last_successful_fetch: Option<DateTime<Utc>>,
    fetch_count: i64,
    failure_count: i64,
    total_jobs_fetched: i64,
    average_jobs_per_fetch: i64,
    fetch_interval_minutes: i32,
    priority: i32,
}

impl From<FeedHealthRow> for FeedHealth {
    fn from(row: FeedHealthRow) -> Self {
        FeedHealth {
            url: row.url,
            name: row.name,
            category: row.category,
            active: row.active,
            last_fetched_at: row.last_fetched_at,
            last_successful_fetch: row.last_successful_fetch,
            fetch_count: row.fetch_count as u64,
            failure_count: row.failure_count as u64,
            total_jobs_fetched: row.total_jobs_fetched as u64,
            average_jobs_per_fetch: row.average_jobs_per_fetch as u64,
            fetch_interval_minutes: row.fetch_interval_minutes as u32,
            priority: row.priority as u32,
        }
    }
}

impl FeedHealthStore for FeedRepository {
    async fn find_by_url(&self, url: &str) -> Result<Option<FeedHealth>, AppError> {
        let row = sqlx::query_as::<_, FeedHealthRow>(r#"SELECT * FROM job_feeds WHERE url = $1"#)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn upsert(&self, health: &FeedHealth) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO job_feeds (url, name, category, active, last_fetched_at,
                                   last_successful_fetch, fetch_count, failure_count,
                                   total_jobs_fetched, average_jobs_per_fetch,
                                   fetch_interval_minutes, priority)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (url)
            DO UPDATE SET
                name = EXCLUDED.name,
                category = EXCLUDED.category,
                active = EXCLUDED.active,
                last_fetched_at = EXCLUDED.last_fetched_at,
                last_successful_fetch = EXCLUDED.last_successful_fetch,
                fetch_count = EXCLUDED.fetch_count,
                failure_count = EXCLUDED.failure_count,
                total_jobs_fetched = EXCLUDED.total_jobs_fetched,
                average_jobs_per_fetch = EXCLUDED.average_jobs_per_fetch,
                fetch_interval_minutes = EXCLUDED.fetch_interval_minutes,
                priority = EXCLUDED.priority
            "#,
        )
        .bind(&health.url)
        .bind(&health.name)
        .bind(&health.category)
        .bind(health.active)
        .bind(health.last_fetched_at)
        .bind(health.last_successful_fetch)
        .bind(health.fetch_count as i64)
        .bind(health.failure_count as i64)
        .bind(health.total_jobs_fetched as i64)
        .bind(health.average_jobs_per_fetch as i64)
        .bind(health.fetch_interval_minutes as i32)
        .bind(health.priority as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<FeedHealth>, AppError> {
        let rows = sqlx::query_as::<_, FeedHealthRow>(
            r#"SELECT * FROM job_feeds ORDER BY priority DESC, url ASC"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
