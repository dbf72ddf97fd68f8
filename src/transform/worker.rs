//! Transform stage: CPU-bound normalization dispatched onto a `rayon`
//! thread pool so the async orchestrator is never blocked by it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::errors::TransformError;
use crate::odds_resolver::{build_odds_records, resolve_event_timestamp};

use super::types::*;

/// Owns a dedicated `rayon::ThreadPool` so transform work never contends
/// with rayon's global pool used elsewhere in the process.
pub struct TransformPool {
    pool: Arc<rayon::ThreadPool>,
}

impl TransformPool {
    pub fn new(num_threads: usize) -> Result<Self, TransformError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("transform-worker-{i}"))
            .build()
            .map_err(|e| TransformError::WorkerPanic(e.to_string()))?;
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Normalizes `raw` off the async runtime, returning the typed record
    /// set or a `TransformError`.
    pub async fn transform(&self, raw: RaceData) -> Result<TransformedRace, TransformError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let (tx, rx) = std::sync::mpsc::channel();
            pool.spawn(move || {
                let _ = tx.send(transform(raw));
            });
            rx.recv()
                .unwrap_or_else(|_| Err(TransformError::WorkerPanic("worker dropped result channel".into())))
        })
        .await
        .map_err(|e| TransformError::WorkerPanic(e.to_string()))?
    }
}

/// Pure normalization function: raw upstream payload -> typed records. Safe
/// to call directly (used by tests and by `TransformPool`).
pub fn transform(raw: RaceData) -> Result<TransformedRace, TransformError> {
    let meeting = raw.meeting.as_ref().map(|m| transform_meeting(m)).transpose()?;

    let race_status = RaceStatus::from_upstream(&raw.race.status)
        .ok_or_else(|| TransformError::InvalidValue {
            field: "race.status".to_string(),
            reason: format!("unrecognized status '{}'", raw.race.status),
        })?;

    let race_date_nz = parse_date(
        raw.race
            .race_date_nz
            .as_deref()
            .or(raw.race.start_time_nz.get(0..10)),
        "race.race_date_nz",
    )?;

    let start_time_nz = parse_datetime(&raw.race.start_time_nz, "race.start_time_nz")?;
    let actual_start = raw
        .race
        .actual_start
        .as_deref()
        .map(|v| parse_datetime(v, "race.actual_start"))
        .transpose()?;

    let race_record = RaceRecord {
        race_id: raw.race.race_id.clone(),
        meeting_id: raw.race.meeting_id.clone(),
        race_number: raw.race.race_number,
        name: raw.race.name.clone(),
        start_time_nz,
        status: race_status,
        distance: raw.race.distance,
        track_condition: raw.race.track_condition.clone(),
        weather: raw.race.weather.clone(),
        race_kind: raw.race.race_kind.clone(),
        race_date_nz,
        actual_start,
        last_poll_time: Utc::now(),
    };

    let entrants: Vec<EntrantRecord> = raw
        .runners
        .iter()
        .map(|r| transform_runner(r, &race_record.race_id))
        .collect::<Result<_, _>>()?;

    let pool_totals = if raw.tote_pools.is_empty() {
        None
    } else {
        Some(transform_pool_totals(&raw.tote_pools, &race_record.race_id))
    };

    let mut transformed = TransformedRace {
        meeting,
        race: race_record,
        entrants,
        money_flow: Vec::new(),
        odds: Vec::new(),
        pool_totals,
    };

    // Race metadata is always present by this point, so this resolves via
    // the NZ-midnight branch; computed before money-flow aggregation so the
    // same value can be stamped onto both money-flow and odds records.
    let event_timestamp = resolve_event_timestamp(&transformed);

    let money_flow_minutes = time_to_start_minutes(&transformed.race);
    let interval_bucket = IntervalBucket::from_time_to_start_minutes(money_flow_minutes);

    transformed.money_flow = if transformed.race.status.is_terminal() {
        Vec::new()
    } else {
        aggregate_money_flow(
            raw.money_tracker.as_ref(),
            &transformed.race.race_id,
            money_flow_minutes,
            interval_bucket,
            transformed.pool_totals.as_ref(),
            event_timestamp,
        )
    };

    transformed.odds = build_odds_records(&raw.runners, event_timestamp)?;

    Ok(transformed)
}

fn transform_meeting(raw: &RawMeeting) -> Result<MeetingRecord, TransformError> {
    Ok(MeetingRecord {
        meeting_id: raw.meeting_id.clone(),
        meeting_name: raw.meeting_name.clone(),
        country: raw.country.clone(),
        race_type: raw.race_type.clone(),
        category: raw.category.clone(),
        date: parse_date(Some(&raw.date), "meeting.date")?,
        weather: raw.weather.clone(),
        track_condition: raw.track_condition.clone(),
    })
}

fn transform_runner(raw: &RawRunner, race_id: &str) -> Result<EntrantRecord, TransformError> {
    let scratch_time = raw
        .scratch_time
        .as_deref()
        .map(|v| parse_datetime(v, "runner.scratch_time"))
        .transpose()?;

    let odds = raw.odds.as_ref();
    Ok(EntrantRecord {
        entrant_id: raw.entrant_id.clone(),
        race_id: race_id.to_string(),
        runner_number: raw.runner_number,
        name: raw.name.clone(),
        jockey: raw.jockey.clone(),
        trainer_name: raw.trainer_name.clone(),
        barrier: raw.barrier,
        is_scratched: raw.is_scratched,
        is_late_scratched: raw.is_late_scratched,
        scratch_time,
        silk_colours: truncate(raw.silk_colours.as_deref(), truncation::SILK_COLOURS),
        silk_url_64: raw.silk_url_64.clone(),
        silk_url_128: raw.silk_url_128.clone(),
        fixed_win_odds: odds.and_then(|o| o.fixed_win).and_then(Decimal::from_f64_retain),
        fixed_place_odds: odds.and_then(|o| o.fixed_place).and_then(Decimal::from_f64_retain),
        pool_win_odds: odds.and_then(|o| o.pool_win).and_then(Decimal::from_f64_retain),
        pool_place_odds: odds.and_then(|o| o.pool_place).and_then(Decimal::from_f64_retain),
        runner_change: truncate(raw.runner_change.as_deref(), truncation::RUNNER_CHANGE),
        owners: truncate(raw.owners.as_deref(), truncation::OWNERS),
        gear: truncate(raw.gear.as_deref(), truncation::GEAR),
    })
}

fn truncate(value: Option<&str>, max_len: usize) -> Option<String> {
    value.map(|v| {
        if v.len() > max_len {
            v.chars().take(max_len).collect()
        } else {
            v.to_string()
        }
    })
}

/// Product-type -> pool-total field mapping is case-sensitive; unknown
/// product types are dropped (logged by the caller, not here, so this
/// function stays pure and unit-testable).
fn transform_pool_totals(raw: &[RawTotePool], race_id: &str) -> RacePoolTotals {
    let mut totals = RacePoolTotals {
        race_id: race_id.to_string(),
        currency: raw
            .first()
            .map(|p| p.currency.clone())
            .unwrap_or_else(|| "NZD".to_string()),
        last_updated: Utc::now(),
        ..Default::default()
    };

    let mut sum = 0i64;
    for pool in raw {
        let cents = to_cents(pool.total);
        match pool.product_type.as_str() {
            "Win" => totals.win_pool_total = Some(cents),
            "Place" => totals.place_pool_total = Some(cents),
            "Quinella" => totals.quinella_pool_total = Some(cents),
            "Trifecta" => totals.trifecta_pool_total = Some(cents),
            "Exacta" => totals.exacta_pool_total = Some(cents),
            "First4" => totals.first4_pool_total = Some(cents),
            _ => {
                tracing::warn!(product_type = %pool.product_type, "unknown tote pool product_type, ignoring");
                continue;
            }
        }
        sum += cents;
    }
    totals.total_race_pool = Some(sum);
    totals
}

fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

fn time_to_start_minutes(race: &RaceRecord) -> i64 {
    let now = Utc::now();
    (race.start_time_nz - now).num_minutes()
}

/// Sums `hold_percentage`/`bet_percentage` across every money-tracker row
/// sharing an `entrant_id` (each row is a separate transaction); taking the
/// last row instead would violate the ~100% hold-percentage invariant.
fn aggregate_money_flow(
    tracker: Option<&RawMoneyTracker>,
    race_id: &str,
    ttsm: i64,
    bucket: IntervalBucket,
    pool_totals: Option<&RacePoolTotals>,
    event_timestamp: chrono::DateTime<Utc>,
) -> Vec<MoneyFlowSnapshot> {
    let Some(tracker) = tracker else {
        return Vec::new();
    };

    let mut sums: HashMap<&str, (f64, f64)> = HashMap::new();
    for entry in &tracker.entrants {
        let slot = sums.entry(entry.entrant_id.as_str()).or_insert((0.0, 0.0));
        slot.0 += entry.hold_percentage;
        slot.1 += entry.bet_percentage;
    }

    let now = Utc::now();
    sums.into_iter()
        .map(|(entrant_id, (hold, bet))| {
            let (win_pool_amount, place_pool_amount) = pool_totals
                .map(|totals| {
                    let win = totals
                        .win_pool_total
                        .map(|total| pool_share(total, hold));
                    let place = totals
                        .place_pool_total
                        .map(|total| pool_share(total, hold));
                    (win, place)
                })
                .unwrap_or((None, None));

            MoneyFlowSnapshot {
                entrant_id: entrant_id.to_string(),
                race_id: race_id.to_string(),
                polling_timestamp: now,
                event_timestamp,
                time_to_start_minutes: ttsm,
                interval_bucket: bucket,
                hold_percentage: Decimal::from_f64_retain(hold).unwrap_or_default(),
                bet_percentage: Decimal::from_f64_retain(bet).unwrap_or_default(),
                win_pool_amount,
                place_pool_amount,
                flow_type: MoneyFlowType::HoldPercentage,
            }
        })
        .collect()
}

fn pool_share(pool_total_cents: i64, hold_percentage: f64) -> i64 {
    ((pool_total_cents as f64) * hold_percentage / 100.0).round() as i64
}

fn parse_date(value: Option<&str>, field: &str) -> Result<chrono::NaiveDate, TransformError> {
    let value = value.ok_or_else(|| TransformError::MissingField(field.to_string()))?;
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| TransformError::InvalidValue {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

fn parse_datetime(value: &str, field: &str) -> Result<chrono::DateTime<Utc>, TransformError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TransformError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_runner(entrant_id: &str) -> RawRunner {
        RawRunner {
            entrant_id: entrant_id.to_string(),
            runner_number: 1,
            name: "Test Runner".to_string(),
            jockey: None,
            trainer_name: None,
            barrier: Some(3),
            is_scratched: false,
            is_late_scratched: false,
            scratch_time: None,
            silk_colours: Some("blue".to_string()),
            silk_url_64: None,
            silk_url_128: None,
            runner_change: None,
            owners: None,
            gear: None,
            odds: Some(RawOdds {
                fixed_win: Some(7.0),
                fixed_place: Some(2.0),
                pool_win: Some(6.5),
                pool_place: Some(1.9),
            }),
        }
    }

    #[test]
    fn interval_bucket_boundaries_match_spec() {
        assert_eq!(IntervalBucket::from_time_to_start_minutes(31), IntervalBucket::FiveMin);
        assert_eq!(IntervalBucket::from_time_to_start_minutes(30), IntervalBucket::OneMin);
        assert_eq!(IntervalBucket::from_time_to_start_minutes(6), IntervalBucket::OneMin);
        assert_eq!(IntervalBucket::from_time_to_start_minutes(5), IntervalBucket::ThirtySec);
        assert_eq!(IntervalBucket::from_time_to_start_minutes(1), IntervalBucket::ThirtySec);
        assert_eq!(IntervalBucket::from_time_to_start_minutes(0), IntervalBucket::Live);
        assert_eq!(IntervalBucket::from_time_to_start_minutes(-5), IntervalBucket::Live);
    }

    #[test]
    fn money_flow_sums_rows_sharing_entrant_id_instead_of_last_row_wins() {
        let tracker = RawMoneyTracker {
            entrants: vec![
                RawMoneyTrackerEntry {
                    entrant_id: "e1".to_string(),
                    hold_percentage: 10.0,
                    bet_percentage: 5.0,
                },
                RawMoneyTrackerEntry {
                    entrant_id: "e1".to_string(),
                    hold_percentage: 15.0,
                    bet_percentage: 5.0,
                },
            ],
        };
        let snapshots = aggregate_money_flow(Some(&tracker), "r1", 10, IntervalBucket::OneMin, None, Utc::now());
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].hold_percentage, Decimal::from_f64_retain(25.0).unwrap());
    }

    #[test]
    fn unknown_product_type_is_dropped_others_kept() {
        let raw = vec![
            RawTotePool {
                product_type: "Win".to_string(),
                total: 1000.0,
                currency: "NZD".to_string(),
            },
            RawTotePool {
                product_type: "SomeNewProduct".to_string(),
                total: 500.0,
                currency: "NZD".to_string(),
            },
        ];
        let totals = transform_pool_totals(&raw, "r1");
        assert_eq!(totals.win_pool_total, Some(100_000));
        assert_eq!(totals.total_race_pool, Some(100_000));
    }

    #[test]
    fn empty_money_tracker_yields_no_snapshots() {
        let snapshots = aggregate_money_flow(None, "r1", 10, IntervalBucket::OneMin, None, Utc::now());
        assert!(snapshots.is_empty());
    }

    #[test]
    fn pool_share_computation_matches_percentage() {
        assert_eq!(pool_share(100_000, 25.0), 25_000);
    }

    #[test]
    fn transform_truncates_oversized_string_fields() {
        let mut runner = sample_runner("e1");
        runner.owners = Some("x".repeat(300));
        let record = transform_runner(&runner, "r1").unwrap();
        assert_eq!(record.owners.unwrap().chars().count(), truncation::OWNERS);
    }
}
