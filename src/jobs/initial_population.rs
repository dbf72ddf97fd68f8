//! Daily initial population: per-race warmup pass over every race
//! discovered for the NZ-local day, run once through the full pipeline so
//! entrants, odds and money-flow exist before the high-frequency poller
//! takes over.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::batch_controller::{process_races, BatchMetrics};
use crate::client::UpstreamClient;
use crate::database::DbPool;
use crate::errors::LockError;
use crate::lock_manager::{LockHandle, LockStore};
use crate::settings::Settings;
use crate::transform::TransformPool;

const JOB_NAME: &str = "daily_initial_population";

pub async fn run(
    client: Arc<dyn UpstreamClient>,
    transform_pool: Arc<TransformPool>,
    db: DbPool,
    lock_store: Arc<dyn LockStore>,
    settings: Arc<Settings>,
    race_ids: Vec<String>,
) -> Result<BatchMetrics, LockError> {
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

    let requested_concurrency = settings.database.pool_max as usize;
    let outcome = process_races(client, transform_pool, db, race_ids, requested_concurrency, settings.clone()).await;

    lock.checkpoint(serde_json::json!({
        "total": outcome.metrics.total,
        "successes": outcome.metrics.successes,
        "failures": outcome.metrics.failures,
    }));

    if lock.should_terminate_for_nz_time(settings.locking.nz_termination_local_hour) {
        if let Err(e) = lock.release("nz-time-termination", serde_json::json!({"reason": "nz-time-termination"})).await {
            error!(job = JOB_NAME, error = %e, "lock release failed");
        }
        return Err(LockError::NzTime(crate::errors::NzTimeTermination {
            job_name: JOB_NAME.to_string(),
        }));
    }

    if let Err(e) = lock
        .release("completed", serde_json::json!({"total": outcome.metrics.total}))
        .await
    {
        error!(job = JOB_NAME, error = %e, "lock release failed");
    }

    Ok(outcome.metrics)
}
