//! Postgres-backed host schedule-state store.
//!
//! The sleep-schedule predicates are expressed in SQL here and must agree
//! with the pure predicates on [`Host`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostsleep_id::HostId;
use sqlx::{postgres::PgPool, postgres::PgRow, Row};
use tracing::warn;

use super::DbError;
use crate::host::{Host, HostKind, HostStatus, ScheduleState, SYSTEM_ACTOR};
use crate::policy::StoredPolicy;
use crate::store::{HostBatch, HostStore, StoreError, UnreadableHost};

const HOST_COLUMNS: &str = r#"
    host_id, started_by, kind, status, no_expiration,
    next_start_time, next_stop_time, temporarily_exempt_until,
    permanently_exempt, should_keep_off, schedule_policy
"#;

/// Shared filter for hosts that follow a sleep schedule.
/// Binds: $1 = reference time, $2 = system actor.
const ELIGIBLE: &str = r#"
    kind = 'spawn'
    AND started_by <> $2
    AND no_expiration
    AND status IN ('running', 'stopping', 'stopped', 'starting')
    AND NOT permanently_exempt
    AND (temporarily_exempt_until IS NULL OR temporarily_exempt_until <= $1)
    AND NOT should_keep_off
"#;

pub(super) fn parse_host_id(raw: &str) -> Result<HostId, StoreError> {
    HostId::parse(raw).map_err(|e| StoreError::Corrupt(format!("host id '{raw}': {e}")))
}

struct HostRow {
    host_id: String,
    started_by: String,
    kind: String,
    status: String,
    no_expiration: bool,
    next_start_time: Option<DateTime<Utc>>,
    next_stop_time: Option<DateTime<Utc>>,
    temporarily_exempt_until: Option<DateTime<Utc>>,
    permanently_exempt: bool,
    should_keep_off: bool,
    schedule_policy: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, PgRow> for HostRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            host_id: row.try_get("host_id")?,
            started_by: row.try_get("started_by")?,
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            no_expiration: row.try_get("no_expiration")?,
            next_start_time: row.try_get("next_start_time")?,
            next_stop_time: row.try_get("next_stop_time")?,
            temporarily_exempt_until: row.try_get("temporarily_exempt_until")?,
            permanently_exempt: row.try_get("permanently_exempt")?,
            should_keep_off: row.try_get("should_keep_off")?,
            schedule_policy: row.try_get("schedule_policy")?,
        })
    }
}

impl HostRow {
    /// Decode one record. The policy is kept as stored when it does not
    /// decode, so only schedule calculations for this host fail.
    fn into_host(self) -> Result<Host, UnreadableHost> {
        let unreadable = |reason: String| UnreadableHost {
            host_id: self.host_id.clone(),
            reason,
        };

        let id = HostId::parse(&self.host_id).map_err(|e| unreadable(format!("host id: {e}")))?;
        let kind = match self.kind.as_str() {
            "spawn" => HostKind::Spawn,
            "static" => HostKind::Static,
            other => return Err(unreadable(format!("unknown kind '{other}'"))),
        };
        let status: HostStatus = self.status.parse().map_err(unreadable)?;

        Ok(Host {
            id,
            started_by: self.started_by,
            kind,
            status,
            no_expiration: self.no_expiration,
            sleep_schedule: ScheduleState {
                next_start_time: self.next_start_time,
                next_stop_time: self.next_stop_time,
                temporarily_exempt_until: self.temporarily_exempt_until,
                permanently_exempt: self.permanently_exempt,
                should_keep_off: self.should_keep_off,
                policy: StoredPolicy::from_json(self.schedule_policy),
            },
        })
    }
}

/// Host store over the `hosts` table.
#[derive(Clone)]
pub struct PgHostStore {
    pool: PgPool,
}

impl PgHostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a host record.
    pub async fn upsert(&self, host: &Host) -> Result<(), StoreError> {
        let policy = serde_json::to_value(&host.sleep_schedule.policy).map_err(DbError::from)?;
        let kind = match host.kind {
            HostKind::Spawn => "spawn",
            HostKind::Static => "static",
        };

        sqlx::query(
            r#"
            INSERT INTO hosts (
                host_id, started_by, kind, status, no_expiration,
                next_start_time, next_stop_time, temporarily_exempt_until,
                permanently_exempt, should_keep_off, schedule_policy
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (host_id) DO UPDATE SET
                started_by = EXCLUDED.started_by,
                kind = EXCLUDED.kind,
                status = EXCLUDED.status,
                no_expiration = EXCLUDED.no_expiration,
                next_start_time = EXCLUDED.next_start_time,
                next_stop_time = EXCLUDED.next_stop_time,
                temporarily_exempt_until = EXCLUDED.temporarily_exempt_until,
                permanently_exempt = EXCLUDED.permanently_exempt,
                should_keep_off = EXCLUDED.should_keep_off,
                schedule_policy = EXCLUDED.schedule_policy,
                updated_at = now()
            "#,
        )
        .bind(host.id.to_string())
        .bind(&host.started_by)
        .bind(kind)
        .bind(host.status.as_str())
        .bind(host.no_expiration)
        .bind(host.sleep_schedule.next_start_time)
        .bind(host.sleep_schedule.next_stop_time)
        .bind(host.sleep_schedule.temporarily_exempt_until)
        .bind(host.sleep_schedule.permanently_exempt)
        .bind(host.sleep_schedule.should_keep_off)
        .bind(policy)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(())
    }

    /// Fetch a single host.
    pub async fn get(&self, host_id: &HostId) -> Result<Option<Host>, StoreError> {
        let row = sqlx::query_as::<_, HostRow>(&format!(
            "SELECT {HOST_COLUMNS} FROM hosts WHERE host_id = $1"
        ))
        .bind(host_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        row.map(|row| {
            row.into_host().map_err(|unreadable| {
                StoreError::Corrupt(format!("host {}: {}", unreadable.host_id, unreadable.reason))
            })
        })
        .transpose()
    }

    /// Run an eligible-host query with an extra condition.
    async fn find_eligible(
        &self,
        condition: &str,
        reference: DateTime<Utc>,
        timeout: Option<Duration>,
    ) -> Result<HostBatch, StoreError> {
        let sql = format!(
            "SELECT {HOST_COLUMNS} FROM hosts WHERE {ELIGIBLE} AND ({condition}) ORDER BY host_id"
        );
        let mut query = sqlx::query_as::<_, HostRow>(&sql)
            .bind(reference)
            .bind(SYSTEM_ACTOR);
        if let Some(timeout) = timeout {
            query = query.bind(timeout.as_secs_f64());
        }

        let rows = query.fetch_all(&self.pool).await.map_err(DbError::Query)?;
        Ok(rows.into_iter().map(HostRow::into_host).collect())
    }

    /// Run a single-host update; zero affected rows means the host is gone.
    async fn update_one<'q>(
        &self,
        host_id: &HostId,
        sql: &'q str,
        apply: impl FnOnce(UpdateQuery<'q>) -> UpdateQuery<'q>,
    ) -> Result<(), StoreError> {
        let query = apply(sqlx::query(sql).bind(host_id.to_string()));
        let result = query.execute(&self.pool).await.map_err(DbError::Query)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::HostNotFound(*host_id));
        }
        Ok(())
    }
}

type UpdateQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

#[async_trait]
impl HostStore for PgHostStore {
    async fn find_missing_next_time(
        &self,
        reference: DateTime<Utc>,
    ) -> Result<HostBatch, StoreError> {
        self.find_eligible("next_start_time IS NULL OR next_stop_time IS NULL", reference, None)
            .await
    }

    async fn find_exceeding_timeout(
        &self,
        reference: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<HostBatch, StoreError> {
        self.find_eligible(
            "$1 - next_start_time > make_interval(secs => $3) \
             OR $1 - next_stop_time > make_interval(secs => $3)",
            reference,
            Some(timeout),
        )
        .await
    }

    async fn find_due_to_stop(&self, reference: DateTime<Utc>) -> Result<HostBatch, StoreError> {
        self.find_eligible("status = 'running' AND next_stop_time <= $1", reference, None)
            .await
    }

    async fn find_due_to_start(
        &self,
        reference: DateTime<Utc>,
    ) -> Result<HostBatch, StoreError> {
        self.find_eligible("status = 'stopped' AND next_start_time <= $1", reference, None)
            .await
    }

    async fn find_expired_temporary_exemptions(
        &self,
        reference: DateTime<Utc>,
    ) -> Result<HostBatch, StoreError> {
        let rows = sqlx::query_as::<_, HostRow>(&format!(
            "SELECT {HOST_COLUMNS} FROM hosts \
             WHERE temporarily_exempt_until <= $1 ORDER BY host_id"
        ))
        .bind(reference)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(rows.into_iter().map(HostRow::into_host).collect())
    }

    async fn clear_temporary_exemption(&self, host_id: &HostId) -> Result<(), StoreError> {
        self.update_one(
            host_id,
            "UPDATE hosts SET temporarily_exempt_until = NULL, updated_at = now() \
             WHERE host_id = $1",
            |q| q,
        )
        .await
    }

    async fn find_permanently_exempt(&self) -> Result<Vec<HostId>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT host_id FROM hosts WHERE permanently_exempt ORDER BY host_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        // A record with an unparsable id cannot be addressed by the sync.
        Ok(ids
            .into_iter()
            .filter_map(|raw| match HostId::parse(&raw) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(
                        host_id = %raw,
                        error = %e,
                        "Skipping permanently exempt host with bad id"
                    );
                    None
                }
            })
            .collect())
    }

    async fn set_permanently_exempt(
        &self,
        host_id: &HostId,
        exempt: bool,
    ) -> Result<(), StoreError> {
        self.update_one(
            host_id,
            "UPDATE hosts SET permanently_exempt = $2, updated_at = now() WHERE host_id = $1",
            |q| q.bind(exempt),
        )
        .await
    }

    async fn set_next_start_time(
        &self,
        host_id: &HostId,
        next_start: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update_one(
            host_id,
            "UPDATE hosts SET next_start_time = $2, updated_at = now() WHERE host_id = $1",
            |q| q.bind(next_start),
        )
        .await
    }

    async fn set_next_stop_time(
        &self,
        host_id: &HostId,
        next_stop: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update_one(
            host_id,
            "UPDATE hosts SET next_stop_time = $2, updated_at = now() WHERE host_id = $1",
            |q| q.bind(next_stop),
        )
        .await
    }

    async fn set_next_start_and_stop_times(
        &self,
        host_id: &HostId,
        next_start: DateTime<Utc>,
        next_stop: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update_one(
            host_id,
            "UPDATE hosts SET next_start_time = $2, next_stop_time = $3, updated_at = now() \
             WHERE host_id = $1",
            |q| q.bind(next_start).bind(next_stop),
        )
        .await
    }
}
