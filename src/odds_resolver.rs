//! Deterministic event-timestamp assignment (§4.8) and the two odds
//! emission modes: unconditional (bulk pipeline) and diff-based (poller).

use chrono::{DateTime, Utc};

use crate::errors::TransformError;
use crate::nz_time::nz_midnight_utc;
use crate::transform::types::{OddsKind, OddsSnapshot, RawRunner, TransformedRace};

/// 1. race metadata present -> midnight NZ local on `race_date_nz`.
/// 2. else first money-flow `polling_timestamp`.
/// 3. else now.
pub fn resolve_event_timestamp(transformed: &TransformedRace) -> DateTime<Utc> {
    if !transformed.race.race_id.is_empty() {
        return nz_midnight_utc(transformed.race.race_date_nz);
    }
    if let Some(first) = transformed.money_flow.first() {
        return first.polling_timestamp;
    }
    Utc::now()
}

/// Emits one record per non-null odds kind, unconditionally. Used by the
/// bulk pipeline, which has no access to previously-persisted values.
pub fn build_odds_records(
    runners: &[RawRunner],
    event_timestamp: DateTime<Utc>,
) -> Result<Vec<OddsSnapshot>, TransformError> {
    let mut out = Vec::new();
    for runner in runners {
        let Some(odds) = &runner.odds else { continue };
        for (kind, value) in [
            (OddsKind::FixedWin, odds.fixed_win),
            (OddsKind::FixedPlace, odds.fixed_place),
            (OddsKind::PoolWin, odds.pool_win),
            (OddsKind::PoolPlace, odds.pool_place),
        ] {
            if let Some(v) = value {
                let odds_value = rust_decimal::Decimal::from_f64_retain(v).ok_or_else(|| {
                    TransformError::InvalidValue {
                        field: "runner.odds".to_string(),
                        reason: format!("non-finite odds value {v}"),
                    }
                })?;
                out.push(OddsSnapshot {
                    entrant_id: runner.entrant_id.clone(),
                    odds: odds_value,
                    kind,
                    event_timestamp,
                });
            }
        }
    }
    Ok(out)
}

/// Poller-path emission: only returns records whose value differs from the
/// previously persisted value for that (entrant, kind). `previous` supplies
/// the last persisted odds value, keyed by `(entrant_id, kind)`.
pub fn build_odds_records_diff(
    runners: &[RawRunner],
    event_timestamp: DateTime<Utc>,
    previous: &dyn Fn(&str, OddsKind) -> Option<rust_decimal::Decimal>,
) -> Result<Vec<OddsSnapshot>, TransformError> {
    let all = build_odds_records(runners, event_timestamp)?;
    Ok(all
        .into_iter()
        .filter(|snapshot| previous(&snapshot.entrant_id, snapshot.kind) != Some(snapshot.odds))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::types::RawOdds;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::collections::HashMap;

    fn runner_with_odds(id: &str, fixed_win: f64) -> RawRunner {
        RawRunner {
            entrant_id: id.to_string(),
            runner_number: 1,
            name: "Runner".to_string(),
            jockey: None,
            trainer_name: None,
            barrier: None,
            is_scratched: false,
            is_late_scratched: false,
            scratch_time: None,
            silk_colours: None,
            silk_url_64: None,
            silk_url_128: None,
            runner_change: None,
            owners: None,
            gear: None,
            odds: Some(RawOdds {
                fixed_win: Some(fixed_win),
                fixed_place: None,
                pool_win: None,
                pool_place: None,
            }),
        }
    }

    #[test]
    fn unconditional_emission_always_produces_records() {
        let runners = vec![runner_with_odds("e1", 7.0)];
        let ts = Utc::now();
        let records = build_odds_records(&runners, ts).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, OddsKind::FixedWin);
    }

    #[test]
    fn diff_based_emission_suppresses_unchanged_values() {
        let runners = vec![runner_with_odds("e1", 7.0)];
        let ts = Utc::now();
        let mut previous: HashMap<(String, OddsKind), Decimal> = HashMap::new();
        previous.insert(("e1".to_string(), OddsKind::FixedWin), Decimal::from_f64_retain(7.0).unwrap());

        let records = build_odds_records_diff(&runners, ts, &|entrant, kind| {
            previous.get(&(entrant.to_string(), kind)).copied()
        })
        .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn diff_based_emission_emits_on_change() {
        let runners = vec![runner_with_odds("e1", 7.0)];
        let ts = Utc::now();
        let mut previous: HashMap<(String, OddsKind), Decimal> = HashMap::new();
        previous.insert(("e1".to_string(), OddsKind::FixedWin), Decimal::from_f64_retain(12.0).unwrap());

        let records = build_odds_records_diff(&runners, ts, &|entrant, kind| {
            previous.get(&(entrant.to_string(), kind)).copied()
        })
        .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn event_timestamp_uses_race_date_nz_midnight_when_race_present() {
        let transformed = TransformedRace {
            meeting: None,
            race: crate::transform::types::RaceRecord {
                race_id: "r1".to_string(),
                meeting_id: "m1".to_string(),
                race_number: 1,
                name: "Race".to_string(),
                start_time_nz: Utc::now(),
                status: crate::transform::types::RaceStatus::Open,
                distance: None,
                track_condition: None,
                weather: None,
                race_kind: None,
                race_date_nz: NaiveDate::from_ymd_opt(2026, 7, 30).unwrap(),
                actual_start: None,
                last_poll_time: Utc::now(),
            },
            entrants: vec![],
            money_flow: vec![],
            odds: vec![],
            pool_totals: None,
        };
        let ts = resolve_event_timestamp(&transformed);
        assert_eq!(crate::nz_time::nz_date(ts), NaiveDate::from_ymd_opt(2026, 7, 30).unwrap());
    }
}
