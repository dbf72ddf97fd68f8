//! Raw upstream payload shapes and the typed records the transform stage
//! produces from them. The raw shapes are the only place in the crate that
//! tolerates untyped/optional JSON; everything downstream is fully typed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Race status, monotone in the forward direction but tolerant of
/// reopening (closed -> open) and "unusual but allowed" (final -> open).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaceStatus {
    Open,
    Closed,
    Interim,
    Final,
    Abandoned,
    Postponed,
}

impl RaceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RaceStatus::Final | RaceStatus::Abandoned)
    }

    pub fn from_upstream(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "open" => Some(RaceStatus::Open),
            "closed" => Some(RaceStatus::Closed),
            "interim" => Some(RaceStatus::Interim),
            "final" | "finalized" => Some(RaceStatus::Final),
            "abandoned" => Some(RaceStatus::Abandoned),
            "postponed" => Some(RaceStatus::Postponed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalBucket {
    #[serde(rename = "5m")]
    FiveMin,
    #[serde(rename = "1m")]
    OneMin,
    #[serde(rename = "30s")]
    ThirtySec,
    #[serde(rename = "live")]
    Live,
}

impl IntervalBucket {
    /// §4.2: `>30 -> 5m`, `(5,30] -> 1m`, `(0,5] -> 30s`, `<=0 -> live`.
    pub fn from_time_to_start_minutes(ttsm: i64) -> Self {
        if ttsm > 30 {
            IntervalBucket::FiveMin
        } else if ttsm > 5 {
            IntervalBucket::OneMin
        } else if ttsm > 0 {
            IntervalBucket::ThirtySec
        } else {
            IntervalBucket::Live
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalBucket::FiveMin => "5m",
            IntervalBucket::OneMin => "1m",
            IntervalBucket::ThirtySec => "30s",
            IntervalBucket::Live => "live",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OddsKind {
    FixedWin,
    FixedPlace,
    PoolWin,
    PoolPlace,
}

impl OddsKind {
    pub const ALL: [OddsKind; 4] = [
        OddsKind::FixedWin,
        OddsKind::FixedPlace,
        OddsKind::PoolWin,
        OddsKind::PoolPlace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OddsKind::FixedWin => "fixed_win",
            OddsKind::FixedPlace => "fixed_place",
            OddsKind::PoolWin => "pool_win",
            OddsKind::PoolPlace => "pool_place",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoneyFlowType {
    HoldPercentage,
    BetPercentage,
    BucketedAggregation,
}

impl MoneyFlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoneyFlowType::HoldPercentage => "hold_percentage",
            MoneyFlowType::BetPercentage => "bet_percentage",
            MoneyFlowType::BucketedAggregation => "bucketed_aggregation",
        }
    }
}

// ---------------------------------------------------------------------
// Raw upstream payload (untyped-tolerant; the only layer allowed to be so)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RaceDataEnvelope {
    pub data: RaceData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaceData {
    pub meeting: Option<RawMeeting>,
    pub race: RawRace,
    #[serde(default)]
    pub runners: Vec<RawRunner>,
    pub money_tracker: Option<RawMoneyTracker>,
    #[serde(default)]
    pub tote_pools: Vec<RawTotePool>,
    pub results: Option<serde_json::Value>,
    pub dividends: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMeeting {
    pub meeting_id: String,
    pub meeting_name: String,
    pub country: String,
    pub race_type: String,
    pub category: Option<String>,
    pub date: String,
    pub weather: Option<String>,
    pub track_condition: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRace {
    pub race_id: String,
    pub meeting_id: String,
    pub race_number: i32,
    pub name: String,
    pub start_time_nz: String,
    pub status: String,
    pub distance: Option<i32>,
    pub track_condition: Option<String>,
    pub weather: Option<String>,
    #[serde(rename = "type")]
    pub race_kind: Option<String>,
    pub race_date_nz: Option<String>,
    pub actual_start: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRunner {
    pub entrant_id: String,
    pub runner_number: i32,
    pub name: String,
    pub jockey: Option<String>,
    pub trainer_name: Option<String>,
    pub barrier: Option<i32>,
    #[serde(default)]
    pub is_scratched: bool,
    #[serde(default)]
    pub is_late_scratched: bool,
    pub scratch_time: Option<String>,
    pub silk_colours: Option<String>,
    pub silk_url_64: Option<String>,
    pub silk_url_128: Option<String>,
    pub runner_change: Option<String>,
    pub owners: Option<String>,
    pub gear: Option<String>,
    pub odds: Option<RawOdds>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOdds {
    pub fixed_win: Option<f64>,
    pub fixed_place: Option<f64>,
    pub pool_win: Option<f64>,
    pub pool_place: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMoneyTracker {
    #[serde(default)]
    pub entrants: Vec<RawMoneyTrackerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMoneyTrackerEntry {
    pub entrant_id: String,
    #[serde(default)]
    pub hold_percentage: f64,
    #[serde(default)]
    pub bet_percentage: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTotePool {
    pub product_type: String,
    pub total: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "NZD".to_string()
}

// ---------------------------------------------------------------------
// Typed output records
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingRecord {
    pub meeting_id: String,
    pub meeting_name: String,
    pub country: String,
    pub race_type: String,
    pub category: Option<String>,
    pub date: chrono::NaiveDate,
    pub weather: Option<String>,
    pub track_condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceRecord {
    pub race_id: String,
    pub meeting_id: String,
    pub race_number: i32,
    pub name: String,
    pub start_time_nz: DateTime<Utc>,
    pub status: RaceStatus,
    pub distance: Option<i32>,
    pub track_condition: Option<String>,
    pub weather: Option<String>,
    pub race_kind: Option<String>,
    pub race_date_nz: chrono::NaiveDate,
    pub actual_start: Option<DateTime<Utc>>,
    pub last_poll_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrantRecord {
    pub entrant_id: String,
    pub race_id: String,
    pub runner_number: i32,
    pub name: String,
    pub jockey: Option<String>,
    pub trainer_name: Option<String>,
    pub barrier: Option<i32>,
    pub is_scratched: bool,
    pub is_late_scratched: bool,
    pub scratch_time: Option<DateTime<Utc>>,
    pub silk_colours: Option<String>,
    pub silk_url_64: Option<String>,
    pub silk_url_128: Option<String>,
    pub fixed_win_odds: Option<Decimal>,
    pub fixed_place_odds: Option<Decimal>,
    pub pool_win_odds: Option<Decimal>,
    pub pool_place_odds: Option<Decimal>,
    pub runner_change: Option<String>,
    pub owners: Option<String>,
    pub gear: Option<String>,
}

/// Declared string-field truncation maxima (§4.2).
pub mod truncation {
    pub const RUNNER_CHANGE: usize = 500;
    pub const OWNERS: usize = 255;
    pub const GEAR: usize = 200;
    pub const SILK_COLOURS: usize = 100;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneyFlowSnapshot {
    pub entrant_id: String,
    pub race_id: String,
    pub polling_timestamp: DateTime<Utc>,
    pub event_timestamp: DateTime<Utc>,
    pub time_to_start_minutes: i64,
    pub interval_bucket: IntervalBucket,
    pub hold_percentage: Decimal,
    pub bet_percentage: Decimal,
    pub win_pool_amount: Option<i64>,
    pub place_pool_amount: Option<i64>,
    pub flow_type: MoneyFlowType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub entrant_id: String,
    pub odds: Decimal,
    pub kind: OddsKind,
    pub event_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RacePoolTotals {
    pub race_id: String,
    pub win_pool_total: Option<i64>,
    pub place_pool_total: Option<i64>,
    pub quinella_pool_total: Option<i64>,
    pub trifecta_pool_total: Option<i64>,
    pub exacta_pool_total: Option<i64>,
    pub first4_pool_total: Option<i64>,
    pub total_race_pool: Option<i64>,
    pub currency: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceResultsRecord {
    pub race_id: String,
    pub results_available: bool,
    pub results_data: serde_json::Value,
    pub dividends_data: serde_json::Value,
    pub fixed_odds_data: serde_json::Value,
    pub result_status: String,
    pub photo_finish: bool,
    pub stewards_inquiry: bool,
    pub protest_lodged: bool,
    pub result_time: DateTime<Utc>,
}

/// Everything the transform stage produces from one poll of one race.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedRace {
    pub meeting: Option<MeetingRecord>,
    pub race: RaceRecord,
    pub entrants: Vec<EntrantRecord>,
    pub money_flow: Vec<MoneyFlowSnapshot>,
    pub odds: Vec<OddsSnapshot>,
    pub pool_totals: Option<RacePoolTotals>,
}
