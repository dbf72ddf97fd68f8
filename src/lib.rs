//! # raceday-ingest
//!
//! A high-throughput Rust pipeline for ingesting NZTAB thoroughbred and
//! harness racing data: meetings, races, entrants, money-flow and odds
//! history. This crate separates the infrastructure layer (fetch,
//! normalize, persist) from scheduling.
//!
//! ## Overview
//!
//! raceday-ingest focuses on:
//!
//! - **Fetch**: rate-limited HTTP access to the NZTAB affiliates API
//! - **Transform**: CPU-isolated normalization of raw payloads into typed
//!   records, including money-flow aggregation and odds resolution
//! - **Persist**: bulk upserts plus partitioned time-series writers, all
//!   inside a single transaction per race
//! - **Coordination**: a distributed lock so only one instance of a
//!   scheduled job runs at a time, with heartbeat and NZ-time cutover
//!
//! ## Architecture
//!
//! ### Fetch Layer
//! `client` talks to the NZTAB affiliates API for both per-race detail and
//! the daily meetings/races discovery feed.
//!
//! ### Transform Layer
//! `transform` normalizes raw JSON into typed records on a dedicated
//! `rayon` thread pool, off the async runtime. `odds_resolver` resolves the
//! event timestamp for odds history and emits unconditional or diffed
//! odds records depending on the caller.
//!
//! ### Persistence Layer
//! `bulk_upsert`, `time_series` and `transaction` together give every race
//! a single all-or-nothing write. `database` owns the connection pool and
//! idempotent schema setup.
//!
//! ### Orchestration Layer
//! `pipeline` drives one race through fetch/transform/write.
//! `batch_controller` fans that out across many races with bounded,
//! panic-safe concurrency. `lock_manager` and `jobs` coordinate the two
//! scheduled jobs; `poller` exposes the single-race on-demand path over
//! HTTP.

/// Typed error taxonomy and retryability classification for every stage.
pub mod errors;

/// Layered configuration: file, then environment variable overrides.
pub mod settings;

/// NZ-local date/time helpers used for partition keys and termination checks.
pub mod nz_time;

/// Upstream NZTAB HTTP client and its untyped wire types.
pub mod client;

/// Raw-to-typed normalization, run on a dedicated CPU-bound worker pool.
pub mod transform;

/// Event-timestamp resolution and unconditional/diff-based odds emission.
pub mod odds_resolver;

/// Connection pooling and idempotent schema setup.
pub mod database;

/// Multi-row upsert statements for meetings, races and entrants.
pub mod bulk_upsert;

/// Partitioned money-flow and odds history writers.
pub mod time_series;

/// Transaction wrapper: commit on success, rollback and re-raise on error.
pub mod transaction;

/// Single-race fetch-transform-write pipeline.
pub mod pipeline;

/// Bounded-concurrency batch driver over many races, panic-safe per race.
pub mod batch_controller;

/// Postgres-backed distributed lock with heartbeat and NZ-time termination.
pub mod lock_manager;

/// Scheduled jobs: daily discovery and daily initial population.
pub mod jobs;

/// HTTP endpoint for on-demand single-race polling.
pub mod poller;

/// Metrics macros, no-op unless the `observability` feature is enabled.
pub mod metrics;

// Re-exports for convenience
pub use batch_controller::{process_races, BatchMetrics, BatchOutcome};
pub use client::{NzTabClient, UpstreamClient};
pub use errors::{DatabaseWriteError, FetchError, LockError, TransformError, WriteError};
pub use pipeline::{process_race, PipelineResult};
pub use settings::Settings;
