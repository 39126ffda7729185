//! Scheduler leases and the tick ledger.
//!
//! A lease row grants one worker exclusive use of a scope until it expires.
//! The tick ledger records which tick ids have been claimed.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostsleep_id::WorkerId;
use sqlx::postgres::PgPool;
use tracing::debug;

use super::DbError;
use crate::store::{Lease, LeaseStore, StoreError, TickLedger, TickStatus};

#[derive(Clone)]
pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseStore for PgLeaseStore {
    async fn try_acquire(
        &self,
        scope: &str,
        holder: &WorkerId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, StoreError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Unavailable(format!("lease ttl out of range: {e}")))?;
        let expires_at = now + ttl;

        // The upsert only takes effect when the current lease is free or ours.
        let acquired: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            INSERT INTO scheduler_leases (scope, holder, expires_at, acquired_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (scope) DO UPDATE SET
                holder = EXCLUDED.holder,
                expires_at = EXCLUDED.expires_at,
                acquired_at = EXCLUDED.acquired_at
            WHERE scheduler_leases.expires_at <= EXCLUDED.acquired_at
               OR scheduler_leases.holder = EXCLUDED.holder
            RETURNING expires_at
            "#,
        )
        .bind(scope)
        .bind(holder.to_string())
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(acquired.map(|expires_at| Lease {
            scope: scope.to_string(),
            holder: *holder,
            expires_at,
        }))
    }

    async fn release(&self, lease: &Lease) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM scheduler_leases WHERE scope = $1 AND holder = $2")
            .bind(&lease.scope)
            .bind(lease.holder.to_string())
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;

        if result.rows_affected() == 0 {
            debug!(scope = %lease.scope, holder = %lease.holder, "Lease already taken over");
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgTickLedger {
    pool: PgPool,
}

impl PgTickLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Recorded status of a tick: `None` if never claimed, `Some(None)` while running.
    pub async fn status(&self, tick_id: &str) -> Result<Option<Option<TickStatus>>, StoreError> {
        let status: Option<Option<String>> =
            sqlx::query_scalar("SELECT status FROM scheduler_ticks WHERE tick_id = $1")
                .bind(tick_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DbError::Query)?;

        status
            .map(|s| s.map(|s| parse_tick_status(&s)).transpose())
            .transpose()
    }
}

fn parse_tick_status(raw: &str) -> Result<TickStatus, StoreError> {
    match raw {
        "completed" => Ok(TickStatus::Completed),
        "cancelled" => Ok(TickStatus::Cancelled),
        "aborted" => Ok(TickStatus::Aborted),
        other => Err(StoreError::Corrupt(format!("unknown tick status '{other}'"))),
    }
}

#[async_trait]
impl TickLedger for PgTickLedger {
    async fn claim(&self, tick_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO scheduler_ticks (tick_id, claimed_at)
            VALUES ($1, $2)
            ON CONFLICT (tick_id) DO NOTHING
            "#,
        )
        .bind(tick_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() == 1)
    }

    async fn finish(
        &self,
        tick_id: &str,
        status: TickStatus,
        failure_count: usize,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let failure_count = i32::try_from(failure_count).unwrap_or(i32::MAX);

        sqlx::query(
            r#"
            UPDATE scheduler_ticks
            SET status = $2, failure_count = $3, finished_at = $4
            WHERE tick_id = $1
            "#,
        )
        .bind(tick_id)
        .bind(status.as_str())
        .bind(failure_count)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(())
    }
}
