//! Append-only inserts into date-partitioned tables. Never creates
//! partitions: a missing partition surfaces as `PartitionNotFoundError`,
//! fatal and non-retryable, for an out-of-band maintenance job to fix.

use std::time::Instant;

use sqlx::{Postgres, Transaction};

use crate::bulk_upsert::UpsertOutcome;
use crate::errors::{PartitionNotFoundError, WriteError};
use crate::nz_time::nz_date;
use crate::transform::types::{MoneyFlowSnapshot, OddsSnapshot};

/// Postgres raises `check_violation` (23514) or `undefined_table` (42P01)
/// class errors when a declarative-partitioned insert has no matching
/// child partition, depending on how partitions are attached.
fn is_partition_missing(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        matches!(db_err.code().as_deref(), Some("23514") | Some("42P01"))
    } else {
        false
    }
}

pub async fn insert_money_flow_history(
    records: &[MoneyFlowSnapshot],
    tx: &mut Transaction<'_, Postgres>,
) -> Result<UpsertOutcome, WriteError> {
    if records.is_empty() {
        return Ok(UpsertOutcome::default());
    }
    let started = Instant::now();

    for record in records {
        let result = sqlx::query(
            "INSERT INTO money_flow_history \
             (entrant_id, race_id, polling_timestamp, event_timestamp, time_to_start_minutes, \
              interval_bucket, hold_percentage, bet_percentage, win_pool_amount, place_pool_amount, flow_type) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(&record.entrant_id)
        .bind(&record.race_id)
        .bind(record.polling_timestamp)
        .bind(record.event_timestamp)
        .bind(record.time_to_start_minutes)
        .bind(record.interval_bucket.as_str())
        .bind(record.hold_percentage)
        .bind(record.bet_percentage)
        .bind(record.win_pool_amount)
        .bind(record.place_pool_amount)
        .bind(record.flow_type.as_str())
        .execute(&mut **tx)
        .await;

        if let Err(err) = result {
            if is_partition_missing(&err) {
                return Err(WriteError::Partition(PartitionNotFoundError {
                    table: "money_flow_history".to_string(),
                    date: nz_date(record.event_timestamp),
                }));
            }
            return Err(WriteError::Database(err.into()));
        }
    }

    Ok(UpsertOutcome {
        row_count: records.len(),
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

pub async fn insert_odds_history(
    records: &[OddsSnapshot],
    tx: &mut Transaction<'_, Postgres>,
) -> Result<UpsertOutcome, WriteError> {
    if records.is_empty() {
        return Ok(UpsertOutcome::default());
    }
    let started = Instant::now();

    for record in records {
        let result = sqlx::query(
            "INSERT INTO odds_history (entrant_id, odds, kind, event_timestamp) VALUES ($1, $2, $3, $4)",
        )
        .bind(&record.entrant_id)
        .bind(record.odds)
        .bind(record.kind.as_str())
        .bind(record.event_timestamp)
        .execute(&mut **tx)
        .await;

        if let Err(err) = result {
            if is_partition_missing(&err) {
                return Err(WriteError::Partition(PartitionNotFoundError {
                    table: "odds_history".to_string(),
                    date: nz_date(record.event_timestamp),
                }));
            }
            return Err(WriteError::Database(err.into()));
        }
    }

    Ok(UpsertOutcome {
        row_count: records.len(),
        duration_ms: started.elapsed().as_millis() as u64,
    })
}
