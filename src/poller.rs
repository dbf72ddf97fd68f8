//! Single-race poller: an HTTP-triggered high-frequency poll of one race.
//! Responds 202 before background work starts; see §4.9.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::Row;
use tracing::{error, info, warn};

use crate::client::UpstreamClient;
use crate::database::DbPool;
use crate::odds_resolver::{build_odds_records_diff, resolve_event_timestamp};
use crate::settings::Settings;
use crate::transform::types::{EntrantRecord, OddsKind, RaceStatus};
use crate::transform::TransformPool;

#[derive(Clone)]
pub struct PollerState {
    pub client: Arc<dyn UpstreamClient>,
    pub transform_pool: Arc<TransformPool>,
    pub db: DbPool,
    pub settings: Arc<Settings>,
}

pub fn router(state: PollerState) -> Router {
    Router::new()
        .route("/poll/race", post(poll_race).get(poll_race))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
pub struct PollRaceBody {
    pub race_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PollRaceQuery {
    pub race_id: Option<String>,
}

async fn poll_race(
    State(state): State<PollerState>,
    Query(query): Query<PollRaceQuery>,
    body: Option<Json<PollRaceBody>>,
) -> impl IntoResponse {
    let race_id = query
        .race_id
        .or_else(|| body.and_then(|b| b.0.race_id))
        .unwrap_or_default();

    if race_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing race_id").into_response();
    }

    let current_status: Option<String> = match sqlx::query("SELECT status FROM races WHERE race_id = $1")
        .bind(&race_id)
        .fetch_optional(&state.db)
        .await
    {
        Ok(Some(row)) => row.try_get("status").ok(),
        Ok(None) => None,
        Err(e) => {
            error!(race_id = %race_id, error = %e, "failed to read race status");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
        }
    };

    let current_status = match current_status {
        Some(s) => s,
        None => return (StatusCode::NOT_FOUND, "unknown race").into_response(),
    };

    if matches!(current_status.as_str(), "final" | "abandoned") {
        return (StatusCode::OK, "no polling required").into_response();
    }

    tokio::spawn(async move {
        if let Err(e) = poll_once(&state, &race_id).await {
            warn!(race_id = %race_id, error = %e, "single-race poll failed");
        }
    });

    (StatusCode::ACCEPTED, "accepted").into_response()
}

/// Runs every §4.9 processing step for one race within one transaction.
pub async fn poll_once(state: &PollerState, race_id: &str) -> anyhow::Result<()> {
    let timeout = Duration::from_millis(state.settings.upstream.fetch_timeout_ms_poll);
    let raw = match state.client.fetch_race_data(race_id, timeout).await? {
        Some(raw) => raw,
        None => {
            info!(race_id, "poller fetch returned 404, skipping");
            return Ok(());
        }
    };

    let transformed = state.transform_pool.transform(raw.clone()).await?;

    crate::transaction::with_transaction(&state.db, |tx| {
        let transformed = &transformed;
        let raw = &raw;
        Box::pin(async move {
            let previous_status: Option<String> =
                sqlx::query("SELECT status FROM races WHERE race_id = $1 FOR UPDATE")
                    .bind(&transformed.race.race_id)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(|e| crate::errors::DatabaseWriteError::from(e))?
                    .and_then(|row| row.try_get("status").ok());

            let new_status = format!("{:?}", transformed.race.status).to_lowercase();
            let status_changed = previous_status.as_deref() != Some(new_status.as_str());

            let mut race = transformed.race.clone();
            crate::bulk_upsert::bulk_upsert_races(std::slice::from_ref(&race), tx).await?;

            if status_changed {
                sqlx::query("UPDATE races SET last_status_change = now() WHERE race_id = $1")
                    .bind(&race.race_id)
                    .execute(&mut **tx)
                    .await
                    .map_err(crate::errors::DatabaseWriteError::from)?;

                if race.status == RaceStatus::Final {
                    sqlx::query("UPDATE races SET finalized_at = now() WHERE race_id = $1")
                        .bind(&race.race_id)
                        .execute(&mut **tx)
                        .await
                        .map_err(crate::errors::DatabaseWriteError::from)?;
                } else if race.status == RaceStatus::Abandoned {
                    sqlx::query("UPDATE races SET abandoned_at = now() WHERE race_id = $1")
                        .bind(&race.race_id)
                        .execute(&mut **tx)
                        .await
                        .map_err(crate::errors::DatabaseWriteError::from)?;
                }
            }

            if let Some(results) = &raw.results {
                let results_time = chrono::Utc::now();
                let fixed_odds_snapshot = serde_json::to_value(&transformed.entrants).unwrap_or_default();
                sqlx::query(
                    "INSERT INTO race_results (race_id, results_available, results_data, dividends_data, \
                     fixed_odds_data, result_status, photo_finish, stewards_inquiry, protest_lodged, result_time) \
                     VALUES ($1, true, $2, $3, $4, $5, false, false, false, $6) \
                     ON CONFLICT (race_id) DO UPDATE SET \
                       results_available = true, results_data = excluded.results_data, \
                       dividends_data = excluded.dividends_data, fixed_odds_data = excluded.fixed_odds_data, \
                       result_status = excluded.result_status, result_time = excluded.result_time",
                )
                .bind(&race.race_id)
                .bind(results.clone())
                .bind(raw.dividends.clone().unwrap_or(serde_json::Value::Null))
                .bind(fixed_odds_snapshot)
                .bind(if race.status == RaceStatus::Final { "final" } else { "interim" })
                .bind(results_time)
                .execute(&mut **tx)
                .await
                .map_err(crate::errors::DatabaseWriteError::from)?;
            }

            if let Some(totals) = &transformed.pool_totals {
                sqlx::query(
                    "INSERT INTO race_pools (race_id, win_pool_total, place_pool_total, quinella_pool_total, \
                     trifecta_pool_total, exacta_pool_total, first4_pool_total, total_race_pool, currency, last_updated) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now()) \
                     ON CONFLICT (race_id) DO UPDATE SET \
                       win_pool_total = excluded.win_pool_total, place_pool_total = excluded.place_pool_total, \
                       quinella_pool_total = excluded.quinella_pool_total, trifecta_pool_total = excluded.trifecta_pool_total, \
                       exacta_pool_total = excluded.exacta_pool_total, first4_pool_total = excluded.first4_pool_total, \
                       total_race_pool = excluded.total_race_pool, currency = excluded.currency, last_updated = now()",
                )
                .bind(&race.race_id)
                .bind(totals.win_pool_total)
                .bind(totals.place_pool_total)
                .bind(totals.quinella_pool_total)
                .bind(totals.trifecta_pool_total)
                .bind(totals.exacta_pool_total)
                .bind(totals.first4_pool_total)
                .bind(totals.total_race_pool)
                .bind(&totals.currency)
                .execute(&mut **tx)
                .await
                .map_err(crate::errors::DatabaseWriteError::from)?;
            }

            let previous_odds = fetch_previous_odds(tx, &transformed.entrants).await?;
            let event_timestamp = resolve_event_timestamp(transformed);
            let diff_odds = build_odds_records_diff(&raw.runners, event_timestamp, &|entrant, kind| {
                previous_odds.get(&(entrant.to_string(), kind)).copied()
            })
            .map_err(|e| crate::errors::DatabaseWriteError::Other(e.to_string()))?;

            crate::bulk_upsert::bulk_upsert_entrants(&transformed.entrants, tx).await?;
            crate::time_series::insert_odds_history(&diff_odds, tx).await?;

            if !race.status.is_terminal() {
                crate::time_series::insert_money_flow_history(&transformed.money_flow, tx).await?;
            }

            race.last_poll_time = chrono::Utc::now();
            sqlx::query("UPDATE races SET last_poll_time = now() WHERE race_id = $1")
                .bind(&race.race_id)
                .execute(&mut **tx)
                .await
                .map_err(crate::errors::DatabaseWriteError::from)?;

            Ok(())
        })
    })
    .await?;

    Ok(())
}

async fn fetch_previous_odds(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    entrants: &[EntrantRecord],
) -> Result<HashMap<(String, OddsKind), Decimal>, crate::errors::DatabaseWriteError> {
    let mut previous = HashMap::new();
    for entrant in entrants {
        let row = sqlx::query(
            "SELECT fixed_win_odds, fixed_place_odds, pool_win_odds, pool_place_odds FROM entrants WHERE entrant_id = $1",
        )
        .bind(&entrant.entrant_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(crate::errors::DatabaseWriteError::from)?;

        if let Some(row) = row {
            if let Ok(v) = row.try_get::<Option<Decimal>, _>("fixed_win_odds") {
                if let Some(v) = v {
                    previous.insert((entrant.entrant_id.clone(), OddsKind::FixedWin), v);
                }
            }
            if let Ok(v) = row.try_get::<Option<Decimal>, _>("fixed_place_odds") {
                if let Some(v) = v {
                    previous.insert((entrant.entrant_id.clone(), OddsKind::FixedPlace), v);
                }
            }
            if let Ok(v) = row.try_get::<Option<Decimal>, _>("pool_win_odds") {
                if let Some(v) = v {
                    previous.insert((entrant.entrant_id.clone(), OddsKind::PoolWin), v);
                }
            }
            if let Ok(v) = row.try_get::<Option<Decimal>, _>("pool_place_odds") {
                if let Some(v) = v {
                    previous.insert((entrant.entrant_id.clone(), OddsKind::PoolPlace), v);
                }
            }
        }
    }
    Ok(previous)
}
