//! Connection pool setup and idempotent schema migration.

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

pub type DbPool = PgPool;

/// Connects with a bounded pool (`DB_POOL_MAX` clamps batch concurrency
/// elsewhere in the crate), retrying the initial connection with jittered
/// exponential backoff since the database may still be starting up in a
/// freshly deployed environment.
pub async fn connect(database_url: &str, pool_max: u32, acquire_timeout_ms: u64) -> Result<DbPool, sqlx::Error> {
    let strategy = ExponentialBackoff::from_millis(200).map(jitter).take(6);
    Retry::spawn(strategy, || async {
        let result = PgPoolOptions::new()
            .max_connections(pool_max)
            .acquire_timeout(Duration::from_millis(acquire_timeout_ms))
            .connect(database_url)
            .await;
        if let Err(ref err) = result {
            tracing::warn!(error = %err, "database connect failed, retrying");
        }
        result
    })
    .await
}

/// Serializes schema migration across concurrent process starts using a
/// Postgres advisory lock held for the duration of the transaction.
pub async fn initialize_database(pool: &DbPool) -> Result<(), sqlx::Error> {
    const MIGRATION_LOCK_KEY: i64 = 0x7261_6365_6461_79; // "raceday" folded to i64

    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    create_tables(&mut tx).await?;

    tx.commit().await?;
    Ok(())
}

async fn create_tables(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meetings (
            meeting_id TEXT PRIMARY KEY,
            meeting_name TEXT NOT NULL,
            country TEXT NOT NULL,
            race_type TEXT NOT NULL,
            category TEXT,
            date DATE NOT NULL,
            weather TEXT,
            track_condition TEXT,
            last_updated TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS races (
            race_id TEXT PRIMARY KEY,
            meeting_id TEXT NOT NULL REFERENCES meetings(meeting_id),
            race_number INT NOT NULL,
            name TEXT NOT NULL,
            start_time_nz TIMESTAMPTZ NOT NULL,
            status TEXT NOT NULL,
            distance INT,
            track_condition TEXT,
            weather TEXT,
            race_kind TEXT,
            race_date_nz DATE NOT NULL,
            actual_start TIMESTAMPTZ,
            last_poll_time TIMESTAMPTZ,
            last_status_change TIMESTAMPTZ,
            finalized_at TIMESTAMPTZ,
            abandoned_at TIMESTAMPTZ,
            last_updated TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entrants (
            entrant_id TEXT PRIMARY KEY,
            race_id TEXT NOT NULL REFERENCES races(race_id),
            runner_number INT NOT NULL,
            name TEXT NOT NULL,
            jockey TEXT,
            trainer_name TEXT,
            barrier INT,
            is_scratched BOOLEAN NOT NULL DEFAULT false,
            is_late_scratched BOOLEAN NOT NULL DEFAULT false,
            scratch_time TIMESTAMPTZ,
            silk_colours TEXT,
            silk_url_64 TEXT,
            silk_url_128 TEXT,
            fixed_win_odds NUMERIC,
            fixed_place_odds NUMERIC,
            pool_win_odds NUMERIC,
            pool_place_odds NUMERIC,
            runner_change TEXT,
            owners TEXT,
            gear TEXT,
            last_updated TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS race_results (
            race_id TEXT PRIMARY KEY REFERENCES races(race_id),
            results_available BOOLEAN NOT NULL,
            results_data JSONB NOT NULL,
            dividends_data JSONB NOT NULL,
            fixed_odds_data JSONB NOT NULL,
            result_status TEXT NOT NULL,
            photo_finish BOOLEAN NOT NULL DEFAULT false,
            stewards_inquiry BOOLEAN NOT NULL DEFAULT false,
            protest_lodged BOOLEAN NOT NULL DEFAULT false,
            result_time TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS race_pools (
            race_id TEXT PRIMARY KEY REFERENCES races(race_id),
            win_pool_total BIGINT,
            place_pool_total BIGINT,
            quinella_pool_total BIGINT,
            trifecta_pool_total BIGINT,
            exacta_pool_total BIGINT,
            first4_pool_total BIGINT,
            total_race_pool BIGINT,
            currency TEXT NOT NULL,
            last_updated TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    // Time-series tables are partitioned by event_timestamp's NZ-local date.
    // Partition provisioning is an out-of-band maintenance job; the parent
    // table declares the partitioning scheme only.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS money_flow_history (
            entrant_id TEXT NOT NULL,
            race_id TEXT NOT NULL,
            polling_timestamp TIMESTAMPTZ NOT NULL,
            event_timestamp TIMESTAMPTZ NOT NULL,
            time_to_start_minutes BIGINT NOT NULL,
            interval_bucket TEXT NOT NULL,
            hold_percentage NUMERIC NOT NULL,
            bet_percentage NUMERIC NOT NULL,
            win_pool_amount BIGINT,
            place_pool_amount BIGINT,
            flow_type TEXT NOT NULL
        ) PARTITION BY RANGE (event_timestamp)
        "#,
    )
    .execute(&mut **tx)
    .await
    .ok();

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS odds_history (
            entrant_id TEXT NOT NULL,
            odds NUMERIC NOT NULL,
            kind TEXT NOT NULL,
            event_timestamp TIMESTAMPTZ NOT NULL
        ) PARTITION BY RANGE (event_timestamp)
        "#,
    )
    .execute(&mut **tx)
    .await
    .ok();

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_locks (
            job_name TEXT PRIMARY KEY,
            holder_id TEXT NOT NULL,
            acquired_at TIMESTAMPTZ NOT NULL,
            heartbeat_at TIMESTAMPTZ NOT NULL,
            status TEXT NOT NULL,
            progress JSONB
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Reads a single text column out of an untyped row, used by call sites
/// that build dynamic multi-row statements.
pub fn try_get_string(row: &PgRow, col: &str) -> Result<String, sqlx::Error> {
    row.try_get::<String, _>(col)
}
