use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const WINDOW_SIZE: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub count: usize,
}

/// Rolling window of tick-path processing times.
#[derive(Debug, Clone)]
pub struct TickLatency {
    samples: VecDeque<u64>,
    total_recorded: u64,
}

impl TickLatency {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW_SIZE),
            total_recorded: 0,
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        if self.samples.len() >= WINDOW_SIZE {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed.as_micros() as u64);
        self.total_recorded += 1;
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.total_recorded = 0;
    }

    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }

    pub fn stats(&self) -> LatencyStats {
        if self.samples.is_empty() {
            return LatencyStats::default();
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let n = sorted.len();
        let at = |pct: usize| sorted[(n * pct / 100).min(n - 1)];
        LatencyStats {
            p50_us: at(50),
            p95_us: at(95),
            p99_us: at(99),
            min_us: sorted[0],
            max_us: sorted[n - 1],
            count: n,
        }
    }
}

impl Default for TickLatency {
    fn default() -> Self {
        Self::new()
    }
}
