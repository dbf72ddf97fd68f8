//! Executes N races with bounded concurrency, clamped by `DB_POOL_MAX`, in
//! waves; aggregates per-wave successes/failures into batch metrics.

use std::sync::Arc;

use futures::future::join_all;
use tracing::warn;

use crate::client::UpstreamClient;
use crate::database::DbPool;
use crate::errors::{PipelineErrorDescriptor, Stage};
use crate::pipeline::{process_race, PipelineResult, PipelineStatus, RowCounts, StageTimings};
use crate::settings::Settings;
use crate::transform::TransformPool;

#[derive(Debug, Clone, Default)]
pub struct BatchMetrics {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub retryable_failures: usize,
    pub max_duration_ms: u64,
    pub effective_concurrency: usize,
}

pub struct BatchOutcome {
    pub metrics: BatchMetrics,
    pub results: Vec<PipelineResult>,
}

/// Effective concurrency is `min(requested, DB_POOL_MAX, 1)`; waves of that
/// size run to completion before the next wave starts, so an in-flight
/// cancellation signal only ever blocks *new* waves, never aborts one.
pub async fn process_races(
    client: Arc<dyn UpstreamClient>,
    transform_pool: Arc<TransformPool>,
    db: DbPool,
    race_ids: Vec<String>,
    requested_concurrency: usize,
    settings: Arc<Settings>,
) -> BatchOutcome {
    let effective_concurrency = requested_concurrency
        .min(settings.database.pool_max as usize)
        .max(1);

    if effective_concurrency != requested_concurrency {
        warn!(
            requested_concurrency,
            effective_concurrency, "clamped batch concurrency to DB_POOL_MAX"
        );
    }

    let mut results = Vec::with_capacity(race_ids.len());

    for wave in race_ids.chunks(effective_concurrency) {
        let tasks = wave.iter().map(|race_id| {
            let client = client.clone();
            let transform_pool = transform_pool.clone();
            let db = db.clone();
            let settings = settings.clone();
            let race_id = race_id.clone();
            tokio::spawn(async move {
                process_race(client.as_ref(), transform_pool.as_ref(), &db, &race_id, settings.as_ref()).await
            })
        });

        // A task panic is converted into a failed{write, retryable=false}
        // result rather than aborting the wave, so no sibling race is lost.
        let wave_results = join_all(tasks).await.into_iter().zip(wave.iter()).map(|(joined, race_id)| {
            joined.unwrap_or_else(|join_err| PipelineResult {
                race_id: race_id.clone(),
                status: PipelineStatus::Failed,
                timings: StageTimings::default(),
                row_counts: RowCounts::default(),
                error: Some(PipelineErrorDescriptor {
                    stage: Stage::Write,
                    message: format!("task panicked: {join_err}"),
                    retryable: false,
                }),
            })
        });
        results.extend(wave_results);
    }

    let mut metrics = BatchMetrics {
        total: results.len(),
        effective_concurrency,
        ..Default::default()
    };

    for result in &results {
        let duration = result.timings.total_ms();
        metrics.max_duration_ms = metrics.max_duration_ms.max(duration);
        match result.status {
            PipelineStatus::Success | PipelineStatus::Skipped => metrics.successes += 1,
            PipelineStatus::Failed => {
                metrics.failures += 1;
                if result.error.as_ref().map(|e| e.retryable).unwrap_or(false) {
                    metrics.retryable_failures += 1;
                }
            }
        }
    }

    BatchOutcome { metrics, results }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_concurrency_is_clamped_to_pool_max() {
        let requested = 50usize;
        let pool_max = 10usize;
        assert_eq!(requested.min(pool_max).max(1), 10);
    }

    #[test]
    fn effective_concurrency_floor_is_one() {
        let requested = 0usize;
        let pool_max = 10usize;
        assert_eq!(requested.min(pool_max).max(1), 1);
    }
}
