//! Layered configuration: `Config.toml` defaults overridden by environment
//! variables, following the same builder + per-field `#[serde(default)]`
//! shape used throughout this workspace.

use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Upstream {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_partner")]
    pub partner: String,
    #[serde(default = "default_partner_id")]
    pub partner_id: String,
    #[serde(default = "default_contact")]
    pub contact: String,
    #[serde(default = "default_fetch_timeout_ms_bulk")]
    pub fetch_timeout_ms_bulk: u64,
    #[serde(default = "default_fetch_timeout_ms_poll")]
    pub fetch_timeout_ms_poll: u64,
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,
}

fn default_base_url() -> String {
    "https://api.tab.co.nz".to_string()
}
fn default_partner() -> String {
    "raceday-ingest".to_string()
}
fn default_partner_id() -> String {
    "raceday-ingest".to_string()
}
fn default_contact() -> String {
    "ops@example.com".to_string()
}
fn default_fetch_timeout_ms_bulk() -> u64 {
    15_000
}
fn default_fetch_timeout_ms_poll() -> u64 {
    12_000
}
fn default_rate_limit_per_sec() -> u32 {
    10
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            partner: default_partner(),
            partner_id: default_partner_id(),
            contact: default_contact(),
            fetch_timeout_ms_bulk: default_fetch_timeout_ms_bulk(),
            fetch_timeout_ms_poll: default_fetch_timeout_ms_poll(),
            rate_limit_per_sec: default_rate_limit_per_sec(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_db_pool_max")]
    pub pool_max: u32,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/raceday".to_string()
}
fn default_db_pool_max() -> u32 {
    10
}
fn default_acquire_timeout_ms() -> u64 {
    5_000
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_max: default_db_pool_max(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Pipeline {
    #[serde(default = "default_pipeline_budget_ms")]
    pub budget_ms: u64,
    #[serde(default = "default_discovery_chunk_size")]
    pub discovery_chunk_size: usize,
    #[serde(default = "default_discovery_chunk_delay_ms")]
    pub discovery_chunk_delay_ms: u64,
}

fn default_pipeline_budget_ms() -> u64 {
    2_000
}
fn default_discovery_chunk_size() -> usize {
    8
}
fn default_discovery_chunk_delay_ms() -> u64 {
    1_500
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            budget_ms: default_pipeline_budget_ms(),
            discovery_chunk_size: default_discovery_chunk_size(),
            discovery_chunk_delay_ms: default_discovery_chunk_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Locking {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    #[serde(default = "default_nz_termination_hour")]
    pub nz_termination_local_hour: u32,
}

fn default_heartbeat_interval_ms() -> u64 {
    15_000
}
fn default_stale_after_ms() -> u64 {
    60_000
}
fn default_nz_termination_hour() -> u32 {
    1
}

impl Default for Locking {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
            nz_termination_local_hour: default_nz_termination_hour(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Observability {
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_log_filter() -> String {
    "info".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}

impl Default for Observability {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            metrics_port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub upstream: Upstream,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub pipeline: Pipeline,
    #[serde(default)]
    pub locking: Locking,
    #[serde(default)]
    pub observability: Observability,
}

impl Settings {
    /// Loads `Config.toml` (if present) and then applies the environment
    /// variable overrides enumerated in the external interfaces contract.
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("Config").required(false))
            .build()?;

        let mut settings: Settings = builder.try_deserialize().unwrap_or_default();

        if let Ok(v) = env::var("NZTAB_BASE_URL") {
            settings.upstream.base_url = v;
        }
        if let Ok(v) = env::var("NZTAB_PARTNER") {
            settings.upstream.partner = v;
        }
        if let Ok(v) = env::var("NZTAB_PARTNER_ID") {
            settings.upstream.partner_id = v;
        }
        if let Ok(v) = env::var("NZTAB_CONTACT") {
            settings.upstream.contact = v;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            settings.database.url = v;
        }
        if let Ok(v) = env::var("DB_POOL_MAX") {
            if let Ok(parsed) = v.parse() {
                settings.database.pool_max = parsed;
            }
        }
        if let Ok(v) = env::var("FETCH_TIMEOUT_MS_BULK") {
            if let Ok(parsed) = v.parse() {
                settings.upstream.fetch_timeout_ms_bulk = parsed;
            }
        }
        if let Ok(v) = env::var("FETCH_TIMEOUT_MS_POLL") {
            if let Ok(parsed) = v.parse() {
                settings.upstream.fetch_timeout_ms_poll = parsed;
            }
        }
        if let Ok(v) = env::var("PIPELINE_BUDGET_MS") {
            if let Ok(parsed) = v.parse() {
                settings.pipeline.budget_ms = parsed;
            }
        }
        if let Ok(v) = env::var("LOCK_HEARTBEAT_INTERVAL_MS") {
            if let Ok(parsed) = v.parse() {
                settings.locking.heartbeat_interval_ms = parsed;
            }
        }
        if let Ok(v) = env::var("LOCK_STALE_AFTER_MS") {
            if let Ok(parsed) = v.parse() {
                settings.locking.stale_after_ms = parsed;
            }
        }
        if let Ok(v) = env::var("NZ_TERMINATION_LOCAL_HOUR") {
            if let Ok(parsed) = v.parse() {
                settings.locking.nz_termination_local_hour = parsed;
            }
        }
        if let Ok(v) = env::var("RUST_LOG") {
            settings.observability.log_filter = v;
        }
        if let Ok(v) = env::var("METRICS_PORT") {
            if let Ok(parsed) = v.parse() {
                settings.observability.metrics_port = parsed;
            }
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let s = Settings::default();
        assert_eq!(s.upstream.fetch_timeout_ms_bulk, 15_000);
        assert_eq!(s.upstream.fetch_timeout_ms_poll, 12_000);
        assert_eq!(s.pipeline.budget_ms, 2_000);
        assert_eq!(s.locking.heartbeat_interval_ms, 15_000);
        assert_eq!(s.locking.stale_after_ms, 60_000);
        assert_eq!(s.locking.nz_termination_local_hour, 1);
    }
}
