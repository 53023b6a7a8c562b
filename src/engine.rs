use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, Universe};
use crate::correlator::{CorrelationOutcome, Correlator};
use crate::error::{EngineError, PersistError};
use crate::latency::{LatencyStats, TickLatency};
use crate::ledger::LeaderLedger;
use crate::matrix::{CausalityMatrix, CausalityRelation};
use crate::prices::PriceTracker;
use crate::query::MatrixView;
use crate::types::*;

/// The engine behind one lock. The tick worker is its only writer.
pub type SharedEngine = Arc<Mutex<CausalityEngine>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub delta: TickDelta,
    pub leader_opened: bool,
    pub outcome: CorrelationOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    pub uptime_secs: u64,
    pub tracked_assets: usize,
    pub total_ticks: u64,
    pub live_leader_events: usize,
    pub divergence_events: u64,
    pub tick_latency: LatencyStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationRecord {
    pub leader: String,
    pub follower: String,
    #[serde(flatten)]
    pub relation: CausalityRelation,
}

/// Full serialisable engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub saved_at: Timestamp,
    pub assets: Vec<String>,
    pub config: EngineConfig,
    pub prices: BTreeMap<String, PriceState>,
    pub price_history: BTreeMap<String, Vec<PricePoint>>,
    pub leader_events: Vec<LeaderEvent>,
    pub causality_matrix: Vec<RelationRecord>,
    pub statistics: Statistics,
}

/// All lead-follow state for one fixed asset universe.
pub struct CausalityEngine {
    config: EngineConfig,
    universe: Universe,
    prices: PriceTracker,
    ledger: LeaderLedger,
    matrix: CausalityMatrix,
    correlator: Correlator,
    stats: Statistics,
    changed: Vec<bool>,
    latency: TickLatency,
}

impl CausalityEngine {
    pub fn new(universe: Universe, config: EngineConfig) -> Self {
        let n = universe.len();
        Self {
            prices: PriceTracker::new(n, config.history_capacity),
            ledger: LeaderLedger::new(config.move_threshold, config.lag_window_ms),
            matrix: CausalityMatrix::new(n),
            correlator: Correlator::new(config.follow_threshold, config.lag_window_ms),
            stats: Statistics {
                start_time: now_ms(),
                ..Statistics::default()
            },
            changed: vec![false; n],
            latency: TickLatency::new(),
            universe,
            config,
        }
    }

    pub fn shared(self) -> SharedEngine {
        Arc::new(Mutex::new(self))
    }

    /// Runs one tick through price tracking, the leader ledger and the
    /// correlator. Rejected ticks leave every piece of state untouched.
    pub fn process_tick(
        &mut self,
        asset: &str,
        price: f64,
        timestamp: Timestamp,
    ) -> Result<TickReport, EngineError> {
        let started = Instant::now();
        let idx = self
            .universe
            .ordinal(asset)
            .ok_or_else(|| EngineError::UnknownAsset(asset.to_string()))?;
        if !price.is_finite() || price <= 0.0 {
            return Err(EngineError::InvalidPrice {
                asset: asset.to_string(),
                price,
            });
        }

        self.stats.total_ticks += 1;
        let delta = self.prices.ingest(idx, price, timestamp);
        self.changed[idx] = true;

        let name = self.universe.name(idx);
        let leader_opened = self.ledger.register_if_leader(&delta, name);
        if leader_opened {
            self.stats.leader_events_detected += 1;
        }
        let outcome = self.correlator.correlate(
            &delta,
            name,
            &mut self.ledger,
            &mut self.matrix,
            &mut self.stats,
        );

        self.latency.record(started.elapsed());
        Ok(TickReport {
            delta,
            leader_opened,
            outcome,
        })
    }

    /// Stamps the tick with receipt time.
    pub fn ingest(&mut self, tick: &RawTick) -> Result<TickReport, EngineError> {
        self.process_tick(&tick.asset, tick.price, now_ms())
    }

    /// Expires leader events between ticks.
    pub fn prune_expired(&mut self, now: Timestamp) -> usize {
        self.ledger.prune(now)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    pub fn ledger(&self) -> &LeaderLedger {
        &self.ledger
    }

    pub fn live_events(&self) -> Vec<LeaderEvent> {
        self.ledger.live_events().iter().cloned().collect()
    }

    pub fn matrix(&self) -> &CausalityMatrix {
        &self.matrix
    }

    pub fn relation(&self, leader: &str, follower: &str) -> Option<&CausalityRelation> {
        let l = self.universe.ordinal(leader)?;
        let f = self.universe.ordinal(follower)?;
        self.matrix.get(l, f)
    }

    pub fn price(&self, asset: &str) -> Option<PriceState> {
        self.universe.ordinal(asset).map(|i| *self.prices.state(i))
    }

    pub fn prices(&self) -> HashMap<String, PriceState> {
        self.universe
            .iter()
            .map(|(i, name)| (name.to_string(), *self.prices.state(i)))
            .collect()
    }

    /// Full retained history, oldest first.
    pub fn history(&self, asset: &str) -> Result<Vec<PricePoint>, EngineError> {
        let idx = self
            .universe
            .ordinal(asset)
            .ok_or_else(|| EngineError::UnknownAsset(asset.to_string()))?;
        Ok(self.prices.history(idx).iter().copied().collect())
    }

    pub fn recent_history(&self, asset: &str, points: usize) -> Result<Vec<PricePoint>, EngineError> {
        let idx = self
            .universe
            .ordinal(asset)
            .ok_or_else(|| EngineError::UnknownAsset(asset.to_string()))?;
        Ok(self.prices.recent(idx, points))
    }

    /// Point-in-time copy of the matrix for the query layer.
    pub fn matrix_view(&self) -> MatrixView {
        MatrixView::new(self.universe.assets().to_vec(), self.matrix.clone())
    }

    pub fn latency(&self) -> LatencyStats {
        self.latency.stats()
    }

    pub fn health(&self) -> EngineHealth {
        let uptime_ms = (now_ms() - self.stats.start_time).max(0);
        EngineHealth {
            uptime_secs: (uptime_ms / 1000) as u64,
            tracked_assets: self.universe.len(),
            total_ticks: self.stats.total_ticks,
            live_leader_events: self.ledger.len(),
            divergence_events: self.stats.divergence_events,
            tick_latency: self.latency.stats(),
        }
    }

    pub fn initial_state(&self) -> InitialState {
        InitialState {
            kind: "initial_state",
            prices: self.prices(),
            leader_events: self.live_events(),
            statistics: self.stats,
            coin_config: self.universe.assets().to_vec(),
        }
    }

    /// Prices of assets that ticked since the previous call. Clears the
    /// changed set.
    pub fn take_batch_update(&mut self, now: Timestamp) -> BatchUpdate {
        let mut updates = HashMap::new();
        for (i, changed) in self.changed.iter_mut().enumerate() {
            if *changed {
                updates.insert(self.universe.name(i).to_string(), *self.prices.state(i));
                *changed = false;
            }
        }
        BatchUpdate {
            kind: "batch_update",
            updates,
            timestamp: now,
            leader_events: self.ledger.len(),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let mut prices = BTreeMap::new();
        let mut price_history = BTreeMap::new();
        for (i, name) in self.universe.iter() {
            prices.insert(name.to_string(), *self.prices.state(i));
            price_history.insert(
                name.to_string(),
                self.prices.history(i).iter().copied().collect(),
            );
        }
        let causality_matrix = self
            .matrix
            .iter()
            .map(|(l, f, rel)| RelationRecord {
                leader: self.universe.name(l).to_string(),
                follower: self.universe.name(f).to_string(),
                relation: *rel,
            })
            .collect();

        EngineSnapshot {
            saved_at: now_ms(),
            assets: self.universe.assets().to_vec(),
            config: self.config.clone(),
            prices,
            price_history,
            leader_events: self.live_events(),
            causality_matrix,
            statistics: self.stats,
        }
    }

    /// Loads a snapshot taken over the same universe. Configuration is kept
    /// from the running engine, not the snapshot.
    pub fn restore(&mut self, snapshot: EngineSnapshot) -> Result<(), PersistError> {
        if snapshot.assets != self.universe.assets() {
            return Err(PersistError::UniverseMismatch {
                expected: self.universe.assets().to_vec(),
                found: snapshot.assets,
            });
        }

        for (i, name) in self.universe.iter() {
            let state = snapshot.prices.get(name).copied().unwrap_or_default();
            let history = snapshot
                .price_history
                .get(name)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            self.prices.restore(i, state, history);
        }

        let mut events = Vec::with_capacity(snapshot.leader_events.len());
        for mut event in snapshot.leader_events {
            match self.universe.ordinal(&event.leader_asset) {
                Some(idx) => {
                    event.leader = idx;
                    events.push(event);
                }
                None => warn!("dropping restored leader event for {}", event.leader_asset),
            }
        }
        self.ledger.restore(events);

        self.matrix = CausalityMatrix::new(self.universe.len());
        for record in snapshot.causality_matrix {
            let (Some(l), Some(f)) = (
                self.universe.ordinal(&record.leader),
                self.universe.ordinal(&record.follower),
            ) else {
                continue;
            };
            if let Some(rel) = self.matrix.get_mut(l, f) {
                *rel = record.relation;
            }
        }

        self.stats = snapshot.statistics;
        self.changed.iter_mut().for_each(|c| *c = true);
        info!(
            "restored snapshot from {} ({} ticks, {} live leader events)",
            snapshot.saved_at,
            self.stats.total_ticks,
            self.ledger.len()
        );
        Ok(())
    }
}

/// Single writer: drains the tick queue in arrival order, one tick per lock.
pub async fn run_tick_worker(engine: SharedEngine, mut rx: mpsc::Receiver<RawTick>) {
    while let Some(tick) = rx.recv().await {
        let result = engine.lock().ingest(&tick);
        match result {
            Ok(report) => {
                if report.outcome.follows > 0 || report.outcome.divergences > 0 {
                    debug!(
                        "{} {:+.3}% follows={} divergences={}",
                        tick.asset,
                        report.delta.change_percent,
                        report.outcome.follows,
                        report.outcome.divergences
                    );
                }
            }
            Err(e @ EngineError::UnknownAsset(_)) => debug!("dropping tick: {e}"),
            Err(e) => warn!("dropping tick: {e}"),
        }
    }
    info!("tick queue closed, worker exiting");
}
