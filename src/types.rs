use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::query::PairStats;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

// ── Input Types (pushed into the tick queue) ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTick {
    pub asset: String,
    pub price: f64,
}

impl RawTick {
    pub fn new(asset: impl Into<String>, price: f64) -> Self {
        Self { asset: asset.into(), price }
    }
}

// ── Engine State ──

/// Latest observed price for one asset. All zero until the first tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceState {
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub last_update_time: Timestamp,
}

impl PriceState {
    pub fn is_set(&self) -> bool {
        self.price > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: f64,
    pub timestamp: Timestamp,
}

/// What a single accepted tick produced. The only thing downstream stages see.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickDelta {
    pub asset: usize,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Pump,
    Dump,
}

impl Direction {
    pub fn of(change_percent: f64) -> Self {
        if change_percent > 0.0 {
            Direction::Pump
        } else {
            Direction::Dump
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::Pump => "pump",
            Direction::Dump => "dump",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub lag_ms: i64,
    pub change_percent: f64,
    pub magnitude_ratio: f64,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderEvent {
    pub timestamp: Timestamp,
    pub leader_asset: String,
    #[serde(skip)]
    pub leader: usize,
    pub price: f64,
    pub change_percent: f64,
    pub direction: Direction,
    pub followers_responded: BTreeMap<String, ResponseRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_ticks: u64,
    pub divergence_events: u64,
    pub leader_events_detected: u64,
    pub start_time: Timestamp,
}

// ── Output Types (sent to dashboard clients) ──

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialState {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub prices: HashMap<String, PriceState>,
    pub leader_events: Vec<LeaderEvent>,
    pub statistics: Statistics,
    pub coin_config: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub updates: HashMap<String, PriceState>,
    pub timestamp: Timestamp,
    pub leader_events: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricesResponse {
    pub prices: HashMap<String, PriceState>,
    pub statistics: Statistics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub asset: String,
    pub history: Vec<PricePoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestPairsResponse {
    pub min_samples: u64,
    pub pairs: Vec<PairStats>,
}
