use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const MOVE_THRESHOLD: f64 = 2.0;
pub const FOLLOW_THRESHOLD: f64 = 0.005;
pub const LAG_WINDOW_MS: i64 = 5 * 60 * 1000;
pub const HISTORY_CAPACITY: usize = 1000;

pub const DEFAULT_ASSETS: &[&str] = &[
    "BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "XRPUSDT", "ADAUSDT", "DOGEUSDT", "AVAXUSDT",
    "DOTUSDT", "LINKUSDT",
];

/// Thresholds and sizes the engine runs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Minimum |change %| for a tick to open a leader event.
    pub move_threshold: f64,
    /// Minimum |change %| for a tick to count as a follower response.
    pub follow_threshold: f64,
    pub lag_window_ms: i64,
    pub history_capacity: usize,
    /// Best pairs must have a follow rate strictly above this.
    pub min_follow_rate: f64,
    pub best_pairs_limit: usize,
    pub default_min_samples: u64,
    pub history_query_points: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            move_threshold: MOVE_THRESHOLD,
            follow_threshold: FOLLOW_THRESHOLD,
            lag_window_ms: LAG_WINDOW_MS,
            history_capacity: HISTORY_CAPACITY,
            min_follow_rate: 0.6,
            best_pairs_limit: 20,
            default_min_samples: 10,
            history_query_points: 100,
        }
    }
}

/// The fixed asset set for a run. Each asset gets a stable ordinal in
/// configuration order; duplicates keep their first position.
#[derive(Debug, Clone, PartialEq)]
pub struct Universe {
    assets: Vec<String>,
    index: HashMap<String, usize>,
}

impl Universe {
    pub fn new<I, S>(assets: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Vec::new();
        let mut index = HashMap::new();
        for asset in assets {
            let asset: String = asset.into();
            let asset = asset.trim().to_string();
            if asset.is_empty() || index.contains_key(&asset) {
                continue;
            }
            index.insert(asset.clone(), list.len());
            list.push(asset);
        }
        if list.is_empty() {
            return Err(EngineError::EmptyUniverse);
        }
        Ok(Self { assets: list, index })
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn ordinal(&self, asset: &str) -> Option<usize> {
        self.index.get(asset).copied()
    }

    pub fn name(&self, ordinal: usize) -> &str {
        &self.assets[ordinal]
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.assets.iter().enumerate().map(|(i, a)| (i, a.as_str()))
    }
}

impl Default for Universe {
    fn default() -> Self {
        let assets = DEFAULT_ASSETS.iter().map(|a| a.to_string()).collect();
        let index = DEFAULT_ASSETS
            .iter()
            .enumerate()
            .map(|(i, a)| (a.to_string(), i))
            .collect();
        Self { assets, index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Binance,
    Synthetic,
}

/// Everything a run mode needs to stand up the tick pipeline.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub universe: Universe,
    pub engine: EngineConfig,
    pub source: SourceKind,
    /// Cadence of synthetic tick cycles.
    pub synthetic_interval: Duration,
    pub leader_rate: f64,
    pub reconnect_delay: Duration,
    pub queue_capacity: usize,
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_interval: Duration,
    pub restore: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            universe: Universe::default(),
            engine: EngineConfig::default(),
            source: SourceKind::Synthetic,
            synthetic_interval: Duration::from_millis(200),
            leader_rate: 0.05,
            reconnect_delay: Duration::from_secs(5),
            queue_capacity: 10_000,
            snapshot_path: None,
            snapshot_interval: Duration::from_secs(60),
            restore: false,
        }
    }
}
