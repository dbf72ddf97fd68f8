//! `Pacific/Auckland` local-time helpers used for partition keying, the
//! odds event-timestamp resolver and the lock manager's termination check.

use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Pacific::Auckland;

/// Converts a UTC instant to its NZ local calendar date. Partitions for
/// `odds_history` and `money_flow_history` are keyed on this, not the UTC
/// wall-clock date.
pub fn nz_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&Auckland).date_naive()
}

/// Midnight NZ local time, on `date`, expressed as a UTC instant. Used to
/// derive the event-timestamp when race metadata carries a `race_date_nz`
/// but no money-flow polling timestamp is yet available.
pub fn nz_midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    let local_midnight = date.and_hms_opt(0, 0, 0).expect("valid midnight");
    Auckland
        .from_local_datetime(&local_midnight)
        .single()
        .unwrap_or_else(|| Auckland.from_utc_datetime(&local_midnight))
        .with_timezone(&Utc)
}

/// True once NZ local time is at or past `hour` on the calendar day *after*
/// `started_at`'s NZ date — the daily scheduled-job cutoff.
pub fn should_terminate_for_nz_time(now: DateTime<Utc>, started_at: DateTime<Utc>, hour: u32) -> bool {
    let now_local = now.with_timezone(&Auckland);
    let start_date = nz_date(started_at);
    let cutoff_date = start_date.succ_opt().expect("valid next day");
    if now_local.date_naive() > cutoff_date {
        return true;
    }
    now_local.date_naive() == cutoff_date && now_local.time().hour() >= hour
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nz_date_handles_utc_day_boundary() {
        // 2026-01-14 12:30 UTC is 2026-01-15 01:30 NZDT (+13 in January).
        let instant = Utc.with_ymd_and_hms(2026, 1, 14, 12, 30, 0).unwrap();
        assert_eq!(nz_date(instant), NaiveDate::from_ymd_opt(2026, 1, 15).unwrap());
    }

    #[test]
    fn nz_date_handles_nzst_in_winter() {
        // July is NZST (+12). 2026-07-14 11:30 UTC -> 2026-07-14 23:30 NZST.
        let instant = Utc.with_ymd_and_hms(2026, 7, 14, 11, 30, 0).unwrap();
        assert_eq!(nz_date(instant), NaiveDate::from_ymd_opt(2026, 7, 14).unwrap());
    }

    #[test]
    fn midnight_round_trips_to_same_nz_date() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let instant = nz_midnight_utc(date);
        assert_eq!(nz_date(instant), date);
    }

    #[test]
    fn termination_flips_at_configured_hour_next_day() {
        let started = Utc.with_ymd_and_hms(2026, 7, 14, 20, 0, 0).unwrap(); // 2026-07-15 08:00 NZST
        let before_cutoff = Utc.with_ymd_and_hms(2026, 7, 15, 12, 30, 0).unwrap(); // 2026-07-16 00:30 NZST
        let after_cutoff = Utc.with_ymd_and_hms(2026, 7, 15, 13, 30, 0).unwrap(); // 2026-07-16 01:30 NZST
        assert!(!should_terminate_for_nz_time(before_cutoff, started, 1));
        assert!(should_terminate_for_nz_time(after_cutoff, started, 1));
    }
}
