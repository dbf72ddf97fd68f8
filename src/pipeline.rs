//! `process_race`: fetch -> transform -> write, with per-stage timing, a
//! soft 2000ms pipeline budget, and typed stage errors.

use std::time::{Duration, Instant};

use tracing::{info_span, warn};

use crate::bulk_upsert::{bulk_upsert_entrants, bulk_upsert_meetings, bulk_upsert_races};
use crate::client::UpstreamClient;
use crate::database::DbPool;
use crate::errors::{PipelineErrorDescriptor, Stage, WriteError};
use crate::settings::Settings;
use crate::time_series::{insert_money_flow_history, insert_odds_history};
use crate::transaction::with_transaction;
use crate::transform::{TransformPool, TransformedRace};

#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub fetch_ms: u64,
    pub transform_ms: u64,
    pub write_ms: u64,
}

impl StageTimings {
    pub fn total_ms(&self) -> u64 {
        self.fetch_ms + self.transform_ms + self.write_ms
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RowCounts {
    pub meetings: usize,
    pub races: usize,
    pub entrants: usize,
    pub money_flow: usize,
    pub odds: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Success,
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub race_id: String,
    pub status: PipelineStatus,
    pub timings: StageTimings,
    pub row_counts: RowCounts,
    pub error: Option<PipelineErrorDescriptor>,
}

/// Runs the persist sequence from §4.6 inside one transaction: meeting,
/// race, entrants, then the two time-series tables.
async fn persist(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    transformed: &TransformedRace,
) -> Result<RowCounts, WriteError> {
    let mut counts = RowCounts::default();

    if let Some(meeting) = &transformed.meeting {
        let outcome = bulk_upsert_meetings(std::slice::from_ref(meeting), tx).await?;
        counts.meetings = outcome.row_count;
    }

    let race_outcome = bulk_upsert_races(std::slice::from_ref(&transformed.race), tx).await?;
    counts.races = race_outcome.row_count;

    let entrants_outcome = bulk_upsert_entrants(&transformed.entrants, tx).await?;
    counts.entrants = entrants_outcome.row_count;

    let money_flow_outcome = insert_money_flow_history(&transformed.money_flow, tx).await?;
    counts.money_flow = money_flow_outcome.row_count;

    let odds_outcome = insert_odds_history(&transformed.odds, tx).await?;
    counts.odds = odds_outcome.row_count;

    Ok(counts)
}

pub async fn process_race(
    client: &dyn UpstreamClient,
    transform_pool: &TransformPool,
    db: &DbPool,
    race_id: &str,
    settings: &Settings,
) -> PipelineResult {
    let span = info_span!("process_race", race_id = %race_id);
    let _guard = span.enter();

    let mut timings = StageTimings::default();

    let fetch_started = Instant::now();
    let fetch_timeout = Duration::from_millis(settings.upstream.fetch_timeout_ms_bulk);
    let raw = match client.fetch_race_data(race_id, fetch_timeout).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            return PipelineResult {
                race_id: race_id.to_string(),
                status: PipelineStatus::Skipped,
                timings,
                row_counts: RowCounts::default(),
                error: None,
            }
        }
        Err(e) => {
            let retryable = e.retryable();
            return PipelineResult {
                race_id: race_id.to_string(),
                status: PipelineStatus::Failed,
                timings,
                row_counts: RowCounts::default(),
                error: Some(PipelineErrorDescriptor {
                    stage: Stage::Fetch,
                    message: e.to_string(),
                    retryable,
                }),
            };
        }
    };
    timings.fetch_ms = fetch_started.elapsed().as_millis() as u64;

    let transform_started = Instant::now();
    let transformed = match transform_pool.transform(raw).await {
        Ok(t) => t,
        Err(e) => {
            return PipelineResult {
                race_id: race_id.to_string(),
                status: PipelineStatus::Failed,
                timings,
                row_counts: RowCounts::default(),
                error: Some(PipelineErrorDescriptor {
                    stage: Stage::Transform,
                    message: e.to_string(),
                    retryable: false,
                }),
            };
        }
    };
    timings.transform_ms = transform_started.elapsed().as_millis() as u64;

    let write_started = Instant::now();
    let write_result = with_transaction(db, |tx| {
        let transformed = &transformed;
        Box::pin(async move { persist(tx, transformed).await })
    })
    .await;
    timings.write_ms = write_started.elapsed().as_millis() as u64;

    let row_counts = match write_result {
        Ok(counts) => counts,
        Err(e) => {
            let retryable = e.retryable();
            return PipelineResult {
                race_id: race_id.to_string(),
                status: PipelineStatus::Failed,
                timings,
                row_counts: RowCounts::default(),
                error: Some(PipelineErrorDescriptor {
                    stage: Stage::Write,
                    message: e.to_string(),
                    retryable,
                }),
            };
        }
    };

    if timings.total_ms() > settings.pipeline.budget_ms {
        warn!(
            race_id = %race_id,
            total_ms = timings.total_ms(),
            budget_ms = settings.pipeline.budget_ms,
            "pipeline_over_budget"
        );
    }

    PipelineResult {
        race_id: race_id.to_string(),
        status: PipelineStatus::Success,
        timings,
        row_counts,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::types::{RaceData, RawRace};
    use async_trait::async_trait;

    struct FakeClient {
        response: Result<Option<RaceData>, crate::errors::FetchError>,
    }

    #[async_trait]
    impl UpstreamClient for FakeClient {
        async fn fetch_race_data(
            &self,
            _race_id: &str,
            _timeout: Duration,
        ) -> Result<Option<RaceData>, crate::errors::FetchError> {
            match &self.response {
                Ok(Some(data)) => Ok(Some(data.clone())),
                Ok(None) => Ok(None),
                Err(_) => Err(crate::errors::FetchError::Http {
                    status: 500,
                    body: "boom".to_string(),
                }),
            }
        }

        async fn fetch_racing_meetings(
            &self,
            _date: chrono::NaiveDate,
        ) -> Result<Vec<crate::client::RawMeetingListing>, crate::errors::FetchError> {
            Ok(vec![])
        }
    }

    fn minimal_race_data() -> RaceData {
        RaceData {
            meeting: None,
            race: RawRace {
                race_id: "r1".to_string(),
                meeting_id: "m1".to_string(),
                race_number: 1,
                name: "Race 1".to_string(),
                start_time_nz: "2026-07-30T02:00:00Z".to_string(),
                status: "open".to_string(),
                distance: None,
                track_condition: None,
                weather: None,
                race_kind: None,
                race_date_nz: Some("2026-07-30".to_string()),
                actual_start: None,
            },
            runners: vec![],
            money_tracker: None,
            tote_pools: vec![],
            results: None,
            dividends: None,
        }
    }

    #[tokio::test]
    async fn not_found_client_response_short_circuits_to_none() {
        let client = FakeClient { response: Ok(None) };
        let fetch_result = client.fetch_race_data("r1", Duration::from_millis(100)).await.unwrap();
        assert!(fetch_result.is_none());
    }

    #[tokio::test]
    async fn transform_pool_normalizes_a_minimal_payload() {
        let transform_pool = TransformPool::new(1).unwrap();
        let transformed = transform_pool.transform(minimal_race_data()).await.unwrap();
        assert_eq!(transformed.race.race_id, "r1");
        assert!(transformed.entrants.is_empty());
    }

    #[test]
    fn stage_retryability_matches_spec_table() {
        assert!(crate::errors::FetchError::Timeout { timeout_ms: 15_000 }.retryable());
        assert!(!crate::errors::TransformError::MissingField("x".into())
            .to_string()
            .is_empty());
    }
}
