use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use jobsync_core::error::AppError;
use jobsync_core::models::JobRecord;
use jobsync_core::task::{ImportTask, NewImportTask, TaskStatus};
use jobsync_core::traits::TaskQueue;

/// PostgreSQL-backed task queue using `SELECT FOR UPDATE SKIP LOCKED`.
///
/// The unique `dedup_key` column makes bulk enqueue idempotent, and every
/// terminal transition is guarded on the current status so the caller can
/// tell the first transition from a replay.
#[derive(Clone)]
pub struct TaskRepository {
    pool: Pool<Postgres>,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ImportTaskRow {
    id: Uuid,
    run_id: Uuid,
    dedup_key: String,
    record: serde_json::Value,
    status: String,
    attempts: i32,
    max_attempts: i32,
    next_retry_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    worker_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ImportTaskRow> for ImportTask {
    type Error = AppError;

    fn try_from(row: ImportTaskRow) -> Result<Self, AppError> {
        let record: JobRecord = serde_json::from_value(row.record)?;
        Ok(ImportTask {
            id: row.id,
            run_id: row.run_id,
            dedup_key: row.dedup_key,
            record,
            status: row.status.parse().unwrap_or(TaskStatus::Pending),
            attempts: row.attempts as u32,
            max_attempts: row.max_attempts as u32,
            next_retry_at: row.next_retry_at,
            error_message: row.error_message,
            worker_id: row.worker_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TaskQueue for TaskRepository {
    async fn enqueue_bulk(&self, tasks: Vec<NewImportTask>) -> Result<u64, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Queue(e.to_string()))?;

        let mut enqueued = 0;
        for task in &tasks {
            let record = serde_json::to_value(&task.record)?;
            let result = sqlx::query(
                r#"
                INSERT INTO import_tasks (run_id, dedup_key, record, max_attempts)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (dedup_key) DO NOTHING
                "#,
            )
            .bind(task.run_id)
            .bind(&task.dedup_key)
            .bind(record)
            .bind(task.max_attempts as i32)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Queue(e.to_string()))?;

            enqueued += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| AppError::Queue(e.to_string()))?;
        Ok(enqueued)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<ImportTask>, AppError> {
        let row = sqlx::query_as::<_, ImportTaskRow>(
            r#"
            UPDATE import_tasks
            SET status = 'active', worker_id = $1, attempts = attempts + 1,
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM import_tasks
                WHERE status = 'pending'
                  AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                ORDER BY next_retry_at NULLS FIRST, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Queue(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    async fn complete(&self, task_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE import_tasks
            SET status = 'completed', error_message = NULL, worker_id = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Queue(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail(
        &self,
        task_id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError> {
        // With next_retry_at, reset to pending for retry; otherwise dead-letter.
        let result = sqlx::query(
            r#"
            UPDATE import_tasks
            SET status = CASE WHEN $3::timestamptz IS NOT NULL THEN 'pending' ELSE 'failed' END,
                next_retry_at = $3,
                error_message = $2,
                worker_id = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(task_id)
        .bind(error)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Queue(e.to_string()))?;

        Ok(next_retry_at.is_none() && result.rows_affected() > 0)
    }

    async fn release_worker_tasks(&self, worker_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE import_tasks
            SET status = 'pending', worker_id = NULL, updated_at = NOW()
            WHERE status = 'active'
              AND (worker_id = $1 OR worker_id LIKE $1 || '-%')
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Queue(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn count_by_status(&self, status: TaskStatus) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM import_tasks WHERE status = $1"#)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::Queue(e.to_string()))?;

        Ok(count)
    }

    async fn retry_failed(&self, run_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE import_tasks
            SET status = 'pending', attempts = 0, next_retry_at = NULL,
                error_message = NULL, updated_at = NOW()
            WHERE run_id = $1 AND status = 'failed'
            "#,
        )
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Queue(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn prune_completed(&self, older_than: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"DELETE FROM import_tasks WHERE status = 'completed' AND updated_at < $1"#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Queue(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
