//! Daily meetings/races discovery entry point. Scheduled once per NZ day;
//! exits 0 on success, concurrent-execution-detected, or nz-time-termination,
//! non-zero only on an unhandled error (see the external interfaces contract).

use std::sync::Arc;

use raceday_ingest::client::NzTabClient;
use raceday_ingest::database;
use raceday_ingest::errors::LockError;
use raceday_ingest::lock_manager::{LockStore, PgLockStore};
use raceday_ingest::settings::Settings;
use raceday_ingest::transform::TransformPool;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let settings = Arc::new(Settings::new()?);
    init_logging(&settings);

    #[cfg(feature = "observability")]
    raceday_ingest::metrics::describe_metrics();

    let pool = database::connect(
        &settings.database.url,
        settings.database.pool_max,
        settings.database.acquire_timeout_ms,
    )
    .await?;
    database::initialize_database(&pool).await?;

    let client: Arc<dyn raceday_ingest::client::UpstreamClient> =
        Arc::new(NzTabClient::new(settings.upstream.clone()));
    let num_threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    let transform_pool = Arc::new(TransformPool::new(num_threads)?);
    let lock_store: Arc<dyn LockStore> = Arc::new(PgLockStore::new(pool.clone()));

    let outcome = raceday_ingest::jobs::discovery::run(
        client,
        transform_pool,
        pool,
        lock_store,
        settings,
    )
    .await;

    match outcome {
        Ok(o) => {
            info!(meetings = o.meetings, races = o.races, enhanced = o.enhanced, entrants = o.entrants, "discovery job completed");
            Ok(())
        }
        Err(LockError::Contention(e)) => {
            info!(%e, "discovery job skipped");
            Ok(())
        }
        Err(LockError::NzTime(e)) => {
            info!(%e, "discovery job stopped early");
            Ok(())
        }
        Err(e @ LockError::Store(_)) => {
            error!(error = %e, "discovery job failed");
            Err(e.into())
        }
    }
}

#[cfg(feature = "observability")]
fn init_logging(settings: &Settings) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(&settings.observability.log_filter)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

#[cfg(not(feature = "observability"))]
fn init_logging(_settings: &Settings) {}
