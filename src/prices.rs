use std::collections::VecDeque;

use crate::types::{PricePoint, PriceState, TickDelta, Timestamp};

/// Latest price state plus a capped price history for every asset,
/// indexed by universe ordinal.
#[derive(Debug, Clone)]
pub struct PriceTracker {
    states: Vec<PriceState>,
    history: Vec<VecDeque<PricePoint>>,
    capacity: usize,
}

impl PriceTracker {
    pub fn new(assets: usize, capacity: usize) -> Self {
        Self {
            states: vec![PriceState::default(); assets],
            history: (0..assets).map(|_| VecDeque::with_capacity(capacity)).collect(),
            capacity,
        }
    }

    /// Apply a tick. An asset seen for the first time reports zero change.
    pub fn ingest(&mut self, asset: usize, price: f64, timestamp: Timestamp) -> TickDelta {
        let state = &mut self.states[asset];
        let previous = if state.is_set() { state.price } else { price };
        let change = price - previous;
        let change_percent = if previous != 0.0 { change / previous * 100.0 } else { 0.0 };

        *state = PriceState {
            price,
            change,
            change_percent,
            last_update_time: timestamp,
        };
        push_capped(&mut self.history[asset], PricePoint { price, timestamp }, self.capacity);

        TickDelta {
            asset,
            price,
            change,
            change_percent,
            timestamp,
        }
    }

    pub fn state(&self, asset: usize) -> &PriceState {
        &self.states[asset]
    }

    pub fn states(&self) -> &[PriceState] {
        &self.states
    }

    pub fn history(&self, asset: usize) -> &VecDeque<PricePoint> {
        &self.history[asset]
    }

    /// The most recent `points` entries, oldest first.
    pub fn recent(&self, asset: usize, points: usize) -> Vec<PricePoint> {
        let h = &self.history[asset];
        h.iter().skip(h.len().saturating_sub(points)).copied().collect()
    }

    pub(crate) fn restore(&mut self, asset: usize, state: PriceState, history: &[PricePoint]) {
        self.states[asset] = state;
        let h = &mut self.history[asset];
        h.clear();
        let skip = history.len().saturating_sub(self.capacity);
        h.extend(history.iter().skip(skip).copied());
    }
}

fn push_capped(q: &mut VecDeque<PricePoint>, val: PricePoint, capacity: usize) {
    if capacity == 0 {
        return;
    }
    if q.len() >= capacity {
        q.pop_front();
    }
    q.push_back(val);
}
