use serde::{Deserialize, Serialize};

/// Follow statistics for one ordered (leader, follower) pair.
///
/// Lags and magnitude ratios are kept as running sums; the averages are the
/// same arithmetic means a full recompute over every recorded value gives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalityRelation {
    pub successful_follows: u64,
    pub missed_follows: u64,
    /// Number of recorded (lag, magnitude) samples. Only successes record one.
    pub samples: u64,
    pub lag_sum_ms: f64,
    pub magnitude_sum: f64,
}

impl CausalityRelation {
    pub fn record_follow(&mut self, lag_ms: i64, magnitude_ratio: f64) {
        self.successful_follows += 1;
        self.samples += 1;
        self.lag_sum_ms += lag_ms as f64;
        self.magnitude_sum += magnitude_ratio;
    }

    pub fn record_miss(&mut self) {
        self.missed_follows += 1;
    }

    pub fn total(&self) -> u64 {
        self.successful_follows + self.missed_follows
    }

    /// Successes over all observed opportunities, 0 with no observations.
    pub fn follow_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.successful_follows as f64 / total as f64,
        }
    }

    pub fn avg_lag(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.lag_sum_ms / self.samples as f64
        }
    }

    pub fn avg_magnitude(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.magnitude_sum / self.samples as f64
        }
    }
}

/// Dense matrix of every ordered pair of distinct assets.
///
/// Storage holds exactly `n * (n - 1)` relations; the diagonal has no slot,
/// so `get(a, a)` is always `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct CausalityMatrix {
    n: usize,
    relations: Vec<CausalityRelation>,
}

impl CausalityMatrix {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            relations: vec![CausalityRelation::default(); n * n.saturating_sub(1)],
        }
    }

    pub fn assets(&self) -> usize {
        self.n
    }

    pub fn pair_count(&self) -> usize {
        self.relations.len()
    }

    fn slot(&self, leader: usize, follower: usize) -> Option<usize> {
        if leader == follower || leader >= self.n || follower >= self.n {
            return None;
        }
        let col = if follower < leader { follower } else { follower - 1 };
        Some(leader * (self.n - 1) + col)
    }

    fn pair_of(&self, slot: usize) -> (usize, usize) {
        let leader = slot / (self.n - 1);
        let col = slot % (self.n - 1);
        let follower = if col < leader { col } else { col + 1 };
        (leader, follower)
    }

    pub fn get(&self, leader: usize, follower: usize) -> Option<&CausalityRelation> {
        self.slot(leader, follower).map(|s| &self.relations[s])
    }

    pub fn get_mut(&mut self, leader: usize, follower: usize) -> Option<&mut CausalityRelation> {
        self.slot(leader, follower).map(move |s| &mut self.relations[s])
    }

    /// All pairs, leader-major in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &CausalityRelation)> + '_ {
        self.relations.iter().enumerate().map(move |(slot, rel)| {
            let (leader, follower) = self.pair_of(slot);
            (leader, follower, rel)
        })
    }
}
