use crate::ledger::LeaderLedger;
use crate::matrix::CausalityMatrix;
use crate::types::{ResponseRecord, Statistics, TickDelta};

/// What one follower tick did to the matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelationOutcome {
    pub follows: u32,
    pub divergences: u32,
}

/// Matches each tick against every live leader event and updates the
/// (leader, follower) relations.
#[derive(Debug, Clone, Copy)]
pub struct Correlator {
    follow_threshold: f64,
    lag_window_ms: i64,
}

impl Correlator {
    pub fn new(follow_threshold: f64, lag_window_ms: i64) -> Self {
        Self {
            follow_threshold,
            lag_window_ms,
        }
    }

    /// Every live event from another asset is evaluated independently: one
    /// tick may be credited against several events of the same leader, and
    /// a later tick may be credited again against the same event.
    pub fn correlate(
        &self,
        delta: &TickDelta,
        follower_name: &str,
        ledger: &mut LeaderLedger,
        matrix: &mut CausalityMatrix,
        stats: &mut Statistics,
    ) -> CorrelationOutcome {
        let mut outcome = CorrelationOutcome::default();
        if delta.change_percent.abs() < self.follow_threshold {
            return outcome;
        }

        for event in ledger.live_events_mut().iter_mut() {
            if event.leader == delta.asset {
                continue;
            }
            let lag = delta.timestamp - event.timestamp;
            if lag >= self.lag_window_ms {
                continue;
            }
            let Some(relation) = matrix.get_mut(event.leader, delta.asset) else {
                continue;
            };

            let same_direction = (delta.change_percent > 0.0) == (event.change_percent > 0.0);
            if same_direction {
                let magnitude_ratio = (delta.change_percent / event.change_percent).abs();
                relation.record_follow(lag, magnitude_ratio);
                event.followers_responded.insert(
                    follower_name.to_string(),
                    ResponseRecord {
                        lag_ms: lag,
                        change_percent: delta.change_percent,
                        magnitude_ratio,
                        timestamp: delta.timestamp,
                    },
                );
                outcome.follows += 1;
            } else {
                relation.record_miss();
                stats.divergence_events += 1;
                outcome.divergences += 1;
            }
        }

        outcome
    }
}
