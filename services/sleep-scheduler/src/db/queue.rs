//! Postgres-backed job queue groups.
//!
//! Job ids are unique within a group, so resubmitting a job is a no-op
//! reported as [`SubmitOutcome::Duplicate`].

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use tracing::debug;

use super::DbError;
use crate::jobs::HostModifyJob;
use crate::store::{JobQueue, StoreError, SubmitOutcome};

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Jobs in a group, ordered by when they may run.
    pub async fn pending(&self, group: &str) -> Result<Vec<HostModifyJob>, StoreError> {
        let payloads: Vec<serde_json::Value> = sqlx::query_scalar(
            r#"
            SELECT payload FROM queue_jobs
            WHERE queue_group = $1
            ORDER BY wait_until, job_id
            "#,
        )
        .bind(group)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        payloads
            .into_iter()
            .map(|p| {
                serde_json::from_value(p)
                    .map_err(|e| StoreError::Corrupt(format!("queued job: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn submit(
        &self,
        group: &str,
        job: &HostModifyJob,
    ) -> Result<SubmitOutcome, StoreError> {
        let payload = serde_json::to_value(job).map_err(DbError::from)?;

        let result = sqlx::query(
            r#"
            INSERT INTO queue_jobs (queue_group, job_id, host_id, action, wait_until, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (queue_group, job_id) DO NOTHING
            "#,
        )
        .bind(group)
        .bind(&job.job_id)
        .bind(job.host_id.to_string())
        .bind(job.action.as_str())
        .bind(job.wait_until)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        if result.rows_affected() == 0 {
            debug!(
                queue_group = group,
                job_id = %job.job_id,
                "Job id already present in queue group"
            );
            return Ok(SubmitOutcome::Duplicate);
        }
        Ok(SubmitOutcome::Enqueued)
    }
}
