use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions};

use crate::application::{AppError, AppResult, HistoryQuery, TenantStore};
use crate::domain::{
    ActorId, BumpHistoryEntry, ConfigPatch, CooldownState, DetectionSettings, StateSlot,
    TenantConfig, TenantId,
};

type ConfigRow = (String, Option<String>, Option<String>, Option<String>, i64, bool);
type StateRow = (String, i64, Option<i64>, Option<String>);

pub struct SqliteTenantStore {
    pool: SqlitePool,
}

fn store_err(e: sqlx::Error) -> AppError {
    AppError::StoreUnavailable(e.to_string())
}

fn corrupt(what: impl std::fmt::Display) -> AppError {
    AppError::StoreUnavailable(format!("corrupt row: {what}"))
}

fn to_db(n: u64) -> AppResult<i64> {
    i64::try_from(n).map_err(|_| corrupt(format!("{n} does not fit in INTEGER")))
}

fn from_db(n: i64) -> AppResult<u64> {
    u64::try_from(n).map_err(|_| corrupt(format!("negative value {n}")))
}

// timestamps are stored as epoch microseconds
fn micros_to_time(us: i64) -> AppResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us).ok_or_else(|| corrupt(format!("timestamp {us}")))
}

impl SqliteTenantStore {
    /// db_url 示例
    /// - "sqlite:/data/bumpwatch.db" (docker volume)
    /// - "sqlite::memory:" (tests; pinned to one connection)
    pub async fn new(db_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(store_err)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        // an in-memory database lives and dies with its one connection
        let in_memory = db_url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(store_err)?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenant_config (
              tenant_id TEXT PRIMARY KEY,
              notification_target TEXT,
              escalation_target TEXT,
              detection_source TEXT,
              detection_interval_secs INTEGER NOT NULL,
              detection_enabled BOOLEAN NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        // generation survives a cleared cooldown (last_bump_us NULL)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cooldown_state (
              tenant_id TEXT PRIMARY KEY,
              generation INTEGER NOT NULL,
              last_bump_us INTEGER,
              last_actor TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bump_history (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              tenant_id TEXT NOT NULL,
              actor_id TEXT NOT NULL,
              bumped_at_us INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_tenant_time ON bump_history(tenant_id, bumped_at_us DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_tenant_actor ON bump_history(tenant_id, actor_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }
}

fn config_from_row(row: ConfigRow) -> AppResult<TenantConfig> {
    let (tenant, notification_target, escalation_target, source, interval, enabled) = row;
    Ok(TenantConfig {
        tenant: TenantId::parse(&tenant).map_err(corrupt)?,
        notification_target,
        escalation_target,
        detection: DetectionSettings {
            source,
            interval_secs: from_db(interval)?,
            enabled,
        },
    })
}

fn slot_from_row(row: StateRow) -> AppResult<StateSlot> {
    let (tenant, generation, last_bump_us, last_actor) = row;
    let generation = from_db(generation)?;
    let state = match (last_bump_us, last_actor) {
        (Some(us), Some(actor)) => Some(CooldownState {
            tenant: TenantId::parse(&tenant).map_err(corrupt)?,
            generation,
            last_bump: micros_to_time(us)?,
            last_actor: ActorId::parse(&actor).map_err(corrupt)?,
        }),
        _ => None,
    };
    Ok(StateSlot { generation, state })
}

/// Compare-and-set on `cooldown_state`, usable inside a transaction.
async fn swap_in(
    conn: &mut SqliteConnection,
    tenant: &TenantId,
    expected_generation: u64,
    new_state: Option<&CooldownState>,
) -> AppResult<bool> {
    let expected = to_db(expected_generation)?;
    match new_state {
        Some(state) if state.generation <= expected_generation => Ok(false),
        Some(state) => {
            let query = if expected_generation == 0 {
                sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO cooldown_state(tenant_id, generation, last_bump_us, last_actor)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(tenant.as_str())
                .bind(to_db(state.generation)?)
                .bind(state.last_bump.timestamp_micros())
                .bind(state.last_actor.as_str())
            } else {
                sqlx::query(
                    r#"
                    UPDATE cooldown_state
                    SET generation = ?, last_bump_us = ?, last_actor = ?
                    WHERE tenant_id = ? AND generation = ?
                    "#,
                )
                .bind(to_db(state.generation)?)
                .bind(state.last_bump.timestamp_micros())
                .bind(state.last_actor.as_str())
                .bind(tenant.as_str())
                .bind(expected)
            };
            let done = query.execute(&mut *conn).await.map_err(store_err)?;
            Ok(done.rows_affected() == 1)
        }
        None => {
            let done = sqlx::query(
                r#"
                UPDATE cooldown_state SET last_bump_us = NULL, last_actor = NULL
                WHERE tenant_id = ? AND generation = ?
                "#,
            )
            .bind(tenant.as_str())
            .bind(expected)
            .execute(&mut *conn)
            .await
            .map_err(store_err)?;
            if done.rows_affected() == 1 {
                return Ok(true);
            }
            if expected_generation != 0 {
                return Ok(false);
            }
            let row: Option<(i64,)> =
                sqlx::query_as("SELECT generation FROM cooldown_state WHERE tenant_id = ? LIMIT 1")
                    .bind(tenant.as_str())
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(store_err)?;
            Ok(row.is_none())
        }
    }
}

#[async_trait]
impl TenantStore for SqliteTenantStore {
    async fn get_config(&self, tenant: &TenantId) -> AppResult<Option<TenantConfig>> {
        let row: Option<ConfigRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, notification_target, escalation_target, detection_source,
                   detection_interval_secs, detection_enabled
            FROM tenant_config WHERE tenant_id = ? LIMIT 1
            "#,
        )
        .bind(tenant.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(config_from_row).transpose()
    }

    async fn put_config(&self, tenant: &TenantId, patch: &ConfigPatch) -> AppResult<TenantConfig> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let row: Option<ConfigRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, notification_target, escalation_target, detection_source,
                   detection_interval_secs, detection_enabled
            FROM tenant_config WHERE tenant_id = ? LIMIT 1
            "#,
        )
        .bind(tenant.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        let mut config = match row {
            Some(row) => config_from_row(row)?,
            None => TenantConfig::new(tenant.clone()),
        };
        config.apply(patch);

        sqlx::query(
            r#"
            INSERT INTO tenant_config(
              tenant_id, notification_target, escalation_target, detection_source,
              detection_interval_secs, detection_enabled
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id) DO UPDATE SET
              notification_target = excluded.notification_target,
              escalation_target = excluded.escalation_target,
              detection_source = excluded.detection_source,
              detection_interval_secs = excluded.detection_interval_secs,
              detection_enabled = excluded.detection_enabled
            "#,
        )
        .bind(tenant.as_str())
        .bind(config.notification_target.as_deref())
        .bind(config.escalation_target.as_deref())
        .bind(config.detection.source.as_deref())
        .bind(to_db(config.detection.interval_secs)?)
        .bind(config.detection.enabled)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(config)
    }

    async fn list_configs(&self) -> AppResult<Vec<TenantConfig>> {
        let rows: Vec<ConfigRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, notification_target, escalation_target, detection_source,
                   detection_interval_secs, detection_enabled
            FROM tenant_config ORDER BY tenant_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(config_from_row).collect()
    }

    async fn get_state(&self, tenant: &TenantId) -> AppResult<StateSlot> {
        let row: Option<StateRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, generation, last_bump_us, last_actor
            FROM cooldown_state WHERE tenant_id = ? LIMIT 1
            "#,
        )
        .bind(tenant.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(slot_from_row)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    async fn compare_and_swap_state(
        &self,
        tenant: &TenantId,
        expected_generation: u64,
        new_state: Option<&CooldownState>,
    ) -> AppResult<bool> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let swapped = swap_in(&mut tx, tenant, expected_generation, new_state).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(swapped)
    }

    async fn record_bump(
        &self,
        expected_generation: u64,
        state: &CooldownState,
        entry: &BumpHistoryEntry,
    ) -> AppResult<bool> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        if !swap_in(&mut tx, &state.tenant, expected_generation, Some(state)).await? {
            tx.rollback().await.map_err(store_err)?;
            return Ok(false);
        }

        sqlx::query("INSERT INTO bump_history(tenant_id, actor_id, bumped_at_us) VALUES (?, ?, ?)")
            .bind(entry.tenant.as_str())
            .bind(entry.actor.as_str())
            .bind(entry.at.timestamp_micros())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(true)
    }

    async fn list_active_states(&self) -> AppResult<Vec<CooldownState>> {
        let rows: Vec<StateRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, generation, last_bump_us, last_actor
            FROM cooldown_state WHERE last_bump_us IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(state) = slot_from_row(row)?.state {
                out.push(state);
            }
        }
        Ok(out)
    }

    async fn query_history(&self, query: HistoryQuery) -> AppResult<Vec<BumpHistoryEntry>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT tenant_id, actor_id, bumped_at_us FROM bump_history
            WHERE tenant_id = ? AND (? IS NULL OR actor_id = ?)
            ORDER BY bumped_at_us DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(query.tenant.as_str())
        .bind(query.actor.as_ref().map(ActorId::as_str))
        .bind(query.actor.as_ref().map(ActorId::as_str))
        .bind(i64::from(query.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|(tenant, actor, at)| {
                Ok(BumpHistoryEntry {
                    tenant: TenantId::parse(&tenant).map_err(corrupt)?,
                    actor: ActorId::parse(&actor).map_err(corrupt)?,
                    at: micros_to_time(at)?,
                })
            })
            .collect()
    }

    async fn count_history(&self, tenant: &TenantId, actor: &ActorId) -> AppResult<u64> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM bump_history WHERE tenant_id = ? AND actor_id = ?",
        )
        .bind(tenant.as_str())
        .bind(actor.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        from_db(n)
    }
}
