use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use jobsync_core::error::AppError;
use jobsync_core::models::{JobIdentity, JobRecord};
use jobsync_core::traits::JobStore;

/// PostgreSQL-backed job store.
///
/// Identity is enforced by a unique expression index over the lowercased,
/// trimmed (title, company, location) triple, so the upsert is a single
/// `INSERT .. ON CONFLICT` and racing workers cannot create duplicates.
#[derive(Clone)]
pub struct JobRepository {
    pool: Pool<Postgres>,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct JobRow {
    title: String,
    company: String,
    location: String,
    description: String,
    salary: Option<String>,
    job_type: Option<String>,
    category: Option<String>,
    url: String,
    company_url: Option<String>,
    posted_date: Option<DateTime<Utc>>,
    expiry_date: Option<DateTime<Utc>>,
    source: String,
    source_id: Option<String>,
}

impl From<JobRow> for JobRecord {
    fn from(row: JobRow) -> Self {
        JobRecord {
            title: row.title,
            company: row.company,
            location: row.location,
            description: row.description,
            salary: row.salary,
            job_type: row.job_type,
            category: row.category,
            url: row.url,
            company_url: row.company_url,
            posted_date: row.posted_date,
            expiry_date: row.expiry_date,
            source: row.source,
            source_id: row.source_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UpsertRow {
    #[sqlx(flatten)]
    job: JobRow,
    was_inserted: bool,
}

impl JobStore for JobRepository {
    async fn find_by_identity(
        &self,
        identity: &JobIdentity,
    ) -> Result<Option<JobRecord>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT title, company, location, description, salary, job_type, category,
                   url, company_url, posted_date, expiry_date, source, source_id
            FROM jobs
            WHERE lower(btrim(title)) = $1
              AND lower(btrim(company)) = $2
              AND lower(btrim(location)) = $3
            "#,
        )
        .bind(&identity.title)
        .bind(&identity.company)
        .bind(&identity.location)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn upsert(&self, record: &JobRecord) -> Result<(JobRecord, bool), AppError> {
        // xmax = 0 only for freshly inserted rows, which distinguishes the
        // insert path from the conflict-update path in one round trip.
        let row = sqlx::query_as::<_, UpsertRow>(
            r#"
            INSERT INTO jobs (title, company, location, description, salary, job_type,
                              category, url, company_url, posted_date, expiry_date,
                              source, source_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (lower(btrim(title)), lower(btrim(company)), lower(btrim(location)))
            DO UPDATE SET
                description = EXCLUDED.description,
                salary = EXCLUDED.salary,
                job_type = EXCLUDED.job_type,
                category = EXCLUDED.category,
                url = EXCLUDED.url,
                company_url = EXCLUDED.company_url,
                posted_date = EXCLUDED.posted_date,
                expiry_date = EXCLUDED.expiry_date,
                source = EXCLUDED.source,
                source_id = EXCLUDED.source_id,
                last_synced_at = NOW()
            RETURNING title, company, location, description, salary, job_type, category,
                      url, company_url, posted_date, expiry_date, source, source_id,
                      (xmax = 0) AS was_inserted
            "#,
        )
        .bind(&record.title)
        .bind(&record.company)
        .bind(&record.location)
        .bind(&record.description)
        .bind(&record.salary)
        .bind(&record.job_type)
        .bind(&record.category)
        .bind(&record.url)
        .bind(&record.company_url)
        .bind(record.posted_date)
        .bind(record.expiry_date)
        .bind(&record.source)
        .bind(&record.source_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok((row.job.into(), row.was_inserted))
    }

    async fn count(&self) -> Result<u64, AppError> {
        let (count,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM jobs"#)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(count as u64)
    }
}
