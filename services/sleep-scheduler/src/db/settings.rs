//! Service flags and admin sleep-schedule settings.
//!
//! Both live in singleton rows. A missing row reads as the defaults.

use async_trait::async_trait;
use hostsleep_id::HostId;
use sqlx::postgres::PgPool;

use super::hosts::parse_host_id;
use super::DbError;
use crate::store::{ServiceFlags, SettingsSource, SleepScheduleSettings, StoreError};

#[derive(Clone)]
pub struct PgSettingsSource {
    pool: PgPool,
}

impl PgSettingsSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Toggle the global sleep-schedule flag.
    pub async fn set_sleep_schedule_disabled(&self, disabled: bool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO service_flags (id, sleep_schedule_disabled)
            VALUES (TRUE, $1)
            ON CONFLICT (id) DO UPDATE SET
                sleep_schedule_disabled = EXCLUDED.sleep_schedule_disabled,
                updated_at = now()
            "#,
        )
        .bind(disabled)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;
        Ok(())
    }

    /// Replace the admin list of permanently exempt hosts.
    pub async fn set_permanently_exempt_hosts(
        &self,
        host_ids: &[HostId],
    ) -> Result<(), StoreError> {
        let ids: Vec<String> = host_ids.iter().map(ToString::to_string).collect();
        sqlx::query(
            r#"
            INSERT INTO sleep_schedule_settings (id, permanently_exempt_hosts)
            VALUES (TRUE, $1)
            ON CONFLICT (id) DO UPDATE SET
                permanently_exempt_hosts = EXCLUDED.permanently_exempt_hosts,
                updated_at = now()
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;
        Ok(())
    }
}

#[async_trait]
impl SettingsSource for PgSettingsSource {
    async fn service_flags(&self) -> Result<ServiceFlags, StoreError> {
        let disabled: Option<bool> =
            sqlx::query_scalar("SELECT sleep_schedule_disabled FROM service_flags WHERE id")
                .fetch_optional(&self.pool)
                .await
                .map_err(DbError::Query)?;

        Ok(ServiceFlags {
            sleep_schedule_disabled: disabled.unwrap_or_default(),
        })
    }

    async fn sleep_schedule_settings(&self) -> Result<SleepScheduleSettings, StoreError> {
        let ids: Option<Vec<String>> = sqlx::query_scalar(
            "SELECT permanently_exempt_hosts FROM sleep_schedule_settings WHERE id",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        let permanently_exempt_hosts = ids
            .unwrap_or_default()
            .iter()
            .map(|id| parse_host_id(id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SleepScheduleSettings {
            permanently_exempt_hosts,
        })
    }
}
