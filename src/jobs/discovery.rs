//! Daily meetings/races discovery (§4.11): acquire the lock, fetch today's
//! NZ-local meetings, upsert basic meeting/race rows, then enhance each
//! race with its detailed event payload in rate-limited chunks.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{error, info, warn};

use crate::client::{RawMeetingListing, UpstreamClient};
use crate::database::DbPool;
use crate::errors::LockError;
use crate::lock_manager::{LockHandle, LockStore};
use crate::settings::Settings;
use crate::transaction::with_transaction;
use crate::transform::types::{MeetingRecord, RaceRecord, RaceStatus};
use crate::transform::TransformPool;

const JOB_NAME: &str = "daily_discovery";

pub struct DiscoveryOutcome {
    pub meetings: usize,
    pub races: usize,
    pub enhanced: usize,
    pub entrants: usize,
}

pub async fn run(
    client: Arc<dyn UpstreamClient>,
    transform_pool: Arc<TransformPool>,
    db: DbPool,
    lock_store: Arc<dyn LockStore>,
    settings: Arc<Settings>,
) -> Result<DiscoveryOutcome, LockError> {
    let mut lock = match LockHandle::acquire(lock_store, JOB_NAME, settings.locking.stale_after_ms).await? {
        Some(lock) => lock,
        None => {
            info!(job = JOB_NAME, "concurrent-execution-detected, exiting");
            return Err(LockError::Contention(crate::errors::LockContentionTermination {
                job_name: JOB_NAME.to_string(),
            }));
        }
    };
    lock.setup_heartbeat(Duration::from_millis(settings.locking.heartbeat_interval_ms));

    let outcome = run_body(client, transform_pool, db, &mut lock, &settings).await;

    let (reason, progress) = match &outcome {
        Ok(o) => (
            "completed",
            serde_json::json!({"meetings": o.meetings, "races": o.races, "enhanced": o.enhanced}),
        ),
        Err(_) => ("failed", serde_json::json!({"error": true})),
    };
    if let Err(e) = lock.release(reason, progress).await {
        error!(job = JOB_NAME, error = %e, "lock release failed");
    }

    outcome.map_err(|e| LockError::Store(e.to_string()))
}

async fn run_body(
    client: Arc<dyn UpstreamClient>,
    transform_pool: Arc<TransformPool>,
    db: DbPool,
    lock: &mut LockHandle,
    settings: &Settings,
) -> anyhow::Result<DiscoveryOutcome> {
    let today = crate::nz_time::nz_date(chrono::Utc::now());
    let meetings = client.fetch_racing_meetings(today).await?;

    let meeting_records: Vec<MeetingRecord> = meetings.iter().map(meeting_record_from_listing).collect();
    let mut race_records: Vec<RaceRecord> = Vec::new();
    for meeting in &meetings {
        for race in &meeting.races {
            race_records.push(basic_race_record(meeting, race)?);
        }
    }

    with_transaction(&db, |tx| {
        let meeting_records = &meeting_records;
        Box::pin(async move {
            crate::bulk_upsert::bulk_upsert_meetings(meeting_records, tx)
                .await
                .map(|_| ())
                .map_err(crate::errors::WriteError::Database)
        })
    })
    .await?;

    with_transaction(&db, |tx| {
        let race_records = &race_records;
        Box::pin(async move {
            crate::bulk_upsert::bulk_upsert_races(race_records, tx)
                .await
                .map(|_| ())
                .map_err(crate::errors::WriteError::Database)
        })
    })
    .await?;

    let race_ids: Vec<String> = race_records.iter().map(|r| r.race_id.clone()).collect();
    let mut enhanced = 0usize;
    let mut entrants_total = 0usize;

    for (chunk_idx, chunk) in race_ids.chunks(settings.pipeline.discovery_chunk_size).enumerate() {
        let mut join_set = Vec::with_capacity(chunk.len());
        for race_id in chunk {
            let client = client.clone();
            let transform_pool = transform_pool.clone();
            let race_id = race_id.clone();
            join_set.push(tokio::spawn(async move {
                let timeout = Duration::from_millis(15_000);
                let raw = client.fetch_race_data(&race_id, timeout).await?;
                match raw {
                    Some(raw) => {
                        let transformed = transform_pool.transform(raw).await?;
                        Ok::<_, anyhow::Error>(Some(transformed))
                    }
                    None => Ok(None),
                }
            }));
        }

        for handle in join_set {
            match handle.await {
                Ok(Ok(Some(transformed))) => {
                    with_transaction(&db, |tx| {
                        let race = &transformed.race;
                        let entrants = &transformed.entrants;
                        Box::pin(async move {
                            crate::bulk_upsert::bulk_upsert_races(std::slice::from_ref(race), tx)
                                .await
                                .map_err(crate::errors::WriteError::Database)?;
                            let outcome = crate::bulk_upsert::bulk_upsert_entrants(entrants, tx)
                                .await
                                .map_err(crate::errors::WriteError::Database)?;
                            Ok(outcome.row_count)
                        })
                    })
                    .await
                    .map(|count| entrants_total += count)
                    .ok();
                    enhanced += 1;
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!(error = %e, "discovery enhancement fetch/transform failed for a race"),
                Err(join_err) => warn!(error = %join_err, "discovery enhancement task panicked"),
            }
        }

        lock.checkpoint(serde_json::json!({
            "chunk": chunk_idx,
            "enhanced": enhanced,
            "entrants": entrants_total,
        }));

        if lock.should_terminate_for_nz_time(settings.locking.nz_termination_local_hour) {
            warn!(job = JOB_NAME, "nz-time-termination triggered mid-discovery");
            break;
        }

        let jitter_ms: u64 = rand::thread_rng().gen_range(0..500);
        tokio::time::sleep(Duration::from_millis(settings.pipeline.discovery_chunk_delay_ms + jitter_ms)).await;
    }

    Ok(DiscoveryOutcome {
        meetings: meeting_records.len(),
        races: race_records.len(),
        enhanced,
        entrants: entrants_total,
    })
}

fn meeting_record_from_listing(listing: &RawMeetingListing) -> MeetingRecord {
    MeetingRecord {
        meeting_id: listing.meeting_id.clone(),
        meeting_name: listing.meeting_name.clone(),
        country: listing.country.clone(),
        race_type: listing.race_type.clone(),
        category: Some(listing.category.clone()),
        date: chrono::NaiveDate::parse_from_str(&listing.date, "%Y-%m-%d").unwrap_or_else(|_| crate::nz_time::nz_date(chrono::Utc::now())),
        weather: None,
        track_condition: None,
    }
}

fn basic_race_record(
    meeting: &RawMeetingListing,
    race: &crate::client::RawRaceListing,
) -> anyhow::Result<RaceRecord> {
    let status = RaceStatus::from_upstream(&race.status)
        .ok_or_else(|| anyhow::anyhow!("unrecognized race status '{}'", race.status))?;
    let start_time_nz = chrono::DateTime::parse_from_rfc3339(&race.start_time_nz)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| anyhow::anyhow!("invalid start_time_nz: {e}"))?;

    Ok(RaceRecord {
        race_id: race.race_id.clone(),
        meeting_id: meeting.meeting_id.clone(),
        race_number: race.race_number,
        name: race.name.clone(),
        start_time_nz,
        status,
        distance: None,
        track_condition: None,
        weather: None,
        race_kind: None,
        race_date_nz: crate::nz_time::nz_date(start_time_nz),
        actual_start: None,
        last_poll_time: chrono::Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meeting_record_defaults_category_from_listing() {
        let listing = RawMeetingListing {
            meeting_id: "m1".to_string(),
            meeting_name: "Ellerslie".to_string(),
            country: "NZ".to_string(),
            category: "Thoroughbred Horse Racing".to_string(),
            race_type: "thoroughbred".to_string(),
            date: "2026-07-30".to_string(),
            races: vec![],
        };
        let record = meeting_record_from_listing(&listing);
        assert_eq!(record.category.as_deref(), Some("Thoroughbred Horse Racing"));
    }
}
