use std::collections::{BTreeMap, VecDeque};

use tracing::info;

use crate::types::{Direction, LeaderEvent, TickDelta, Timestamp};

/// Leader events still inside the lag window, in creation order.
#[derive(Debug, Clone)]
pub struct LeaderLedger {
    live: VecDeque<LeaderEvent>,
    move_threshold: f64,
    lag_window_ms: i64,
}

impl LeaderLedger {
    pub fn new(move_threshold: f64, lag_window_ms: i64) -> Self {
        Self {
            live: VecDeque::new(),
            move_threshold,
            lag_window_ms,
        }
    }

    /// Opens a leader event if the tick moved far enough, then prunes
    /// against the tick's clock. Returns whether an event was opened.
    pub fn register_if_leader(&mut self, delta: &TickDelta, asset_name: &str) -> bool {
        let opened = delta.change_percent.abs() >= self.move_threshold;
        if opened {
            let direction = Direction::of(delta.change_percent);
            info!(
                "leader event {} {} {:+.3}% @ {}",
                asset_name,
                direction.label(),
                delta.change_percent,
                delta.price
            );
            self.live.push_back(LeaderEvent {
                timestamp: delta.timestamp,
                leader_asset: asset_name.to_string(),
                leader: delta.asset,
                price: delta.price,
                change_percent: delta.change_percent,
                direction,
                followers_responded: BTreeMap::new(),
            });
        }
        self.prune(delta.timestamp);
        opened
    }

    /// Drops every event with `now - timestamp >= lag window`. Returns how many went.
    pub fn prune(&mut self, now: Timestamp) -> usize {
        let before = self.live.len();
        let window = self.lag_window_ms;
        self.live.retain(|event| now - event.timestamp < window);
        before - self.live.len()
    }

    pub fn live_events(&self) -> &VecDeque<LeaderEvent> {
        &self.live
    }

    pub(crate) fn live_events_mut(&mut self) -> &mut VecDeque<LeaderEvent> {
        &mut self.live
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub(crate) fn restore(&mut self, events: Vec<LeaderEvent>) {
        self.live = events.into();
    }
}
