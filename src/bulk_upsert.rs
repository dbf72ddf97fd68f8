//! Parameterized batched upserts for meetings, races and entrants. A batch
//! of up to 50 rows is always a single round trip: one multi-row `VALUES`
//! statement per call, never one statement per row.

use std::time::Instant;

use sqlx::{Postgres, Transaction};

use crate::errors::DatabaseWriteError;
use crate::transform::types::{EntrantRecord, MeetingRecord, RaceRecord};

/// Outcome of any bulk upsert call.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertOutcome {
    pub row_count: usize,
    pub duration_ms: u64,
}

pub async fn bulk_upsert_meetings(
    rows: &[MeetingRecord],
    tx: &mut Transaction<'_, Postgres>,
) -> Result<UpsertOutcome, DatabaseWriteError> {
    if rows.is_empty() {
        return Ok(UpsertOutcome::default());
    }
    let started = Instant::now();

    let mut sql = String::from(
        "INSERT INTO meetings (meeting_id, meeting_name, country, race_type, category, date, weather, track_condition, last_updated) VALUES ",
    );

    let mut placeholders = Vec::with_capacity(rows.len());
    for (i, _) in rows.iter().enumerate() {
        let base = i * 8;
        placeholders.push(format!(
            "(${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, now())",
            base + 1,
            base + 2,
            base + 3,
            base + 4,
            base + 5,
            base + 6,
            base + 7,
            base + 8
        ));
    }
    sql.push_str(&placeholders.join(", "));
    sql.push_str(
        " ON CONFLICT (meeting_id) DO UPDATE SET \
         meeting_name = excluded.meeting_name, country = excluded.country, \
         race_type = excluded.race_type, category = excluded.category, date = excluded.date, \
         weather = excluded.weather, track_condition = excluded.track_condition, \
         last_updated = now()",
    );

    let mut q = sqlx::query(&sql);
    for row in rows {
        q = q
            .bind(&row.meeting_id)
            .bind(&row.meeting_name)
            .bind(&row.country)
            .bind(&row.race_type)
            .bind(&row.category)
            .bind(row.date)
            .bind(&row.weather)
            .bind(&row.track_condition);
    }

    q.execute(&mut **tx).await.map_err(DatabaseWriteError::from)?;

    Ok(UpsertOutcome {
        row_count: rows.len(),
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

pub async fn bulk_upsert_races(
    rows: &[RaceRecord],
    tx: &mut Transaction<'_, Postgres>,
) -> Result<UpsertOutcome, DatabaseWriteError> {
    if rows.is_empty() {
        return Ok(UpsertOutcome::default());
    }
    let started = Instant::now();

    let mut sql = String::from(
        "INSERT INTO races (race_id, meeting_id, race_number, name, start_time_nz, status, distance, \
         track_condition, weather, race_kind, race_date_nz, actual_start, last_poll_time, last_updated) VALUES ",
    );

    let mut placeholders = Vec::with_capacity(rows.len());
    for (i, _) in rows.iter().enumerate() {
        let base = i * 13;
        placeholders.push(format!(
            "(${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, now())",
            base + 1,
            base + 2,
            base + 3,
            base + 4,
            base + 5,
            base + 6,
            base + 7,
            base + 8,
            base + 9,
            base + 10,
            base + 11,
            base + 12,
            base + 13
        ));
    }
    sql.push_str(&placeholders.join(", "));
    sql.push_str(
        " ON CONFLICT (race_id) DO UPDATE SET \
         meeting_id = excluded.meeting_id, race_number = excluded.race_number, name = excluded.name, \
         start_time_nz = excluded.start_time_nz, status = excluded.status, distance = excluded.distance, \
         track_condition = excluded.track_condition, weather = excluded.weather, race_kind = excluded.race_kind, \
         race_date_nz = excluded.race_date_nz, actual_start = excluded.actual_start, \
         last_poll_time = excluded.last_poll_time, last_updated = now()",
    );

    let mut q = sqlx::query(&sql);
    for row in rows {
        let status = format!("{:?}", row.status).to_lowercase();
        q = q
            .bind(&row.race_id)
            .bind(&row.meeting_id)
            .bind(row.race_number)
            .bind(&row.name)
            .bind(row.start_time_nz)
            .bind(status)
            .bind(row.distance)
            .bind(&row.track_condition)
            .bind(&row.weather)
            .bind(&row.race_kind)
            .bind(row.race_date_nz)
            .bind(row.actual_start)
            .bind(row.last_poll_time);
    }

    q.execute(&mut **tx).await.map_err(DatabaseWriteError::from)?;

    Ok(UpsertOutcome {
        row_count: rows.len(),
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

pub async fn bulk_upsert_entrants(
    rows: &[EntrantRecord],
    tx: &mut Transaction<'_, Postgres>,
) -> Result<UpsertOutcome, DatabaseWriteError> {
    if rows.is_empty() {
        return Ok(UpsertOutcome::default());
    }
    let started = Instant::now();

    let mut sql = String::from(
        "INSERT INTO entrants (entrant_id, race_id, runner_number, name, jockey, trainer_name, barrier, \
         is_scratched, is_late_scratched, scratch_time, silk_colours, silk_url_64, silk_url_128, \
         fixed_win_odds, fixed_place_odds, pool_win_odds, pool_place_odds, runner_change, owners, gear, \
         last_updated) VALUES ",
    );

    let mut placeholders = Vec::with_capacity(rows.len());
    for (i, _) in rows.iter().enumerate() {
        let base = i * 20;
        let cols: Vec<String> = (1..=20).map(|c| format!("${}", base + c)).collect();
        placeholders.push(format!("({}, now())", cols.join(", ")));
    }
    sql.push_str(&placeholders.join(", "));
    sql.push_str(
        " ON CONFLICT (entrant_id) DO UPDATE SET \
         race_id = excluded.race_id, runner_number = excluded.runner_number, name = excluded.name, \
         jockey = excluded.jockey, trainer_name = excluded.trainer_name, barrier = excluded.barrier, \
         is_scratched = excluded.is_scratched, is_late_scratched = excluded.is_late_scratched, \
         scratch_time = excluded.scratch_time, silk_colours = excluded.silk_colours, \
         silk_url_64 = excluded.silk_url_64, silk_url_128 = excluded.silk_url_128, \
         fixed_win_odds = excluded.fixed_win_odds, fixed_place_odds = excluded.fixed_place_odds, \
         pool_win_odds = excluded.pool_win_odds, pool_place_odds = excluded.pool_place_odds, \
         runner_change = excluded.runner_change, owners = excluded.owners, gear = excluded.gear, \
         last_updated = now()",
    );

    let mut q = sqlx::query(&sql);
    for row in rows {
        q = q
            .bind(&row.entrant_id)
            .bind(&row.race_id)
            .bind(row.runner_number)
            .bind(&row.name)
            .bind(&row.jockey)
            .bind(&row.trainer_name)
            .bind(row.barrier)
            .bind(row.is_scratched)
            .bind(row.is_late_scratched)
            .bind(row.scratch_time)
            .bind(&row.silk_colours)
            .bind(&row.silk_url_64)
            .bind(&row.silk_url_128)
            .bind(row.fixed_win_odds)
            .bind(row.fixed_place_odds)
            .bind(row.pool_win_odds)
            .bind(row.pool_place_odds)
            .bind(&row.runner_change)
            .bind(&row.owners)
            .bind(&row.gear);
    }

    q.execute(&mut **tx).await.map_err(DatabaseWriteError::from)?;

    Ok(UpsertOutcome {
        row_count: rows.len(),
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_default_is_zero() {
        let outcome = UpsertOutcome::default();
        assert_eq!(outcome.row_count, 0);
        assert_eq!(outcome.duration_ms, 0);
    }
}
