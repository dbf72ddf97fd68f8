//! Daily initial population entry point: warms up every race discovered for
//! today's NZ-local date through the full pipeline once, before the poller
//! takes over. Exit codes follow the same contract as `discovery_job`.

use std::sync::Arc;

use raceday_ingest::client::NzTabClient;
use raceday_ingest::database;
use raceday_ingest::errors::LockError;
use raceday_ingest::lock_manager::{LockStore, PgLockStore};
use raceday_ingest::settings::Settings;
use raceday_ingest::transform::TransformPool;
use sqlx::Row;
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

    let today = raceday_ingest::nz_time::nz_date(chrono::Utc::now());
    let rows = sqlx::query("SELECT race_id FROM races WHERE race_date_nz = $1 AND status NOT IN ('final', 'abandoned')")
        .bind(today)
        .fetch_all(&pool)
        .await?;
    let race_ids: Vec<String> = rows.iter().map(|r| r.get::<String, _>("race_id")).collect();
    info!(count = race_ids.len(), "initial population candidates loaded");

    let client: Arc<dyn raceday_ingest::client::UpstreamClient> =
        Arc::new(NzTabClient::new(settings.upstream.clone()));
    let num_threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    let transform_pool = Arc::new(TransformPool::new(num_threads)?);
    let lock_store: Arc<dyn LockStore> = Arc::new(PgLockStore::new(pool.clone()));

    let outcome = raceday_ingest::jobs::initial_population::run(
        client,
        transform_pool,
        pool,
        lock_store,
        settings,
        race_ids,
    )
    .await;

    match outcome {
        Ok(metrics) => {
            info!(
                total = metrics.total,
                successes = metrics.successes,
                failures = metrics.failures,
                "initial population job completed"
            );
            Ok(())
        }
        Err(LockError::Contention(e)) => {
            info!(%e, "initial population job skipped");
            Ok(())
        }
        Err(LockError::NzTime(e)) => {
            info!(%e, "initial population job stopped early");
            Ok(())
        }
        Err(e @ LockError::Store(_)) => {
            error!(error = %e, "initial population job failed");
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
