//! HTTP entry point for the single-race poller (§4.9): accepts
//! `POST /poll/race`, responds 202 immediately, and finishes the fetch,
//! transform and diff-based write in the background.

use std::net::SocketAddr;
use std::sync::Arc;

use raceday_ingest::client::NzTabClient;
use raceday_ingest::database;
use raceday_ingest::poller::{router, PollerState};
use raceday_ingest::settings::Settings;
use raceday_ingest::transform::TransformPool;
use tracing::info;

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

    let state = PollerState {
        client,
        transform_pool,
        db: pool,
        settings: settings.clone(),
    };

    let port: u16 = std::env::var("POLLER_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "poller server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
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
