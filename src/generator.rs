use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::RawTick;

const BASE_PRICES: &[(&str, f64)] = &[
    ("BTCUSDT", 67_000.0),
    ("ETHUSDT", 3_400.0),
    ("BNBUSDT", 580.0),
    ("SOLUSDT", 150.0),
    ("XRPUSDT", 0.52),
    ("ADAUSDT", 0.45),
    ("DOGEUSDT", 0.15),
    ("AVAXUSDT", 35.0),
    ("DOTUSDT", 7.0),
    ("LINKUSDT", 14.0),
];

#[derive(Debug, Clone, Copy)]
struct PendingMove {
    asset: usize,
    /// Signed percent move to apply.
    percent: f64,
    cycles_left: u32,
}

/// Random-walk market with occasional leader moves that other assets echo
/// a few cycles later, mostly in the same direction.
pub struct TickGenerator {
    assets: Vec<String>,
    prices: Vec<f64>,
    pending: Vec<PendingMove>,
    rng: StdRng,
    pub leader_rate: f64,
    pub follow_probability: f64,
}

impl TickGenerator {
    pub fn new(assets: &[String], leader_rate: f64) -> Self {
        Self::with_rng(assets, leader_rate, StdRng::from_entropy())
    }

    pub fn seeded(assets: &[String], leader_rate: f64, seed: u64) -> Self {
        Self::with_rng(assets, leader_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(assets: &[String], leader_rate: f64, rng: StdRng) -> Self {
        let prices = assets
            .iter()
            .map(|a| {
                BASE_PRICES
                    .iter()
                    .find(|(sym, _)| *sym == a.as_str())
                    .map(|(_, p)| *p)
                    .unwrap_or(100.0)
            })
            .collect();
        Self {
            assets: assets.to_vec(),
            prices,
            pending: Vec::new(),
            rng,
            leader_rate,
            follow_probability: 0.7,
        }
    }

    pub fn current_prices(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.assets.iter().map(String::as_str).zip(self.prices.iter().copied())
    }

    /// One cycle of ticks: scheduled follower moves land, maybe a new leader
    /// move starts, and a random subset of the remaining assets drifts.
    pub fn generate_cycle(&mut self) -> Vec<RawTick> {
        let n = self.assets.len();
        let mut moved = vec![false; n];
        let mut ticks = Vec::with_capacity(n);

        let mut due = Vec::new();
        self.pending.retain_mut(|p| {
            if p.cycles_left == 0 {
                due.push(*p);
                false
            } else {
                p.cycles_left -= 1;
                true
            }
        });
        for p in due {
            if !moved[p.asset] {
                ticks.push(self.apply(p.asset, p.percent));
                moved[p.asset] = true;
            }
        }

        if n > 1 && self.rng.gen_bool(self.leader_rate.clamp(0.0, 1.0)) {
            let leader = self.rng.gen_range(0..n);
            let sign = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            let percent = sign * self.rng.gen_range(2.0..4.0);
            if !moved[leader] {
                ticks.push(self.apply(leader, percent));
                moved[leader] = true;
            }
            self.schedule_followers(leader, sign);
        }

        for i in 0..n {
            if moved[i] || !self.rng.gen_bool(0.6) {
                continue;
            }
            let percent = self.rng.gen_range(-0.05..0.05);
            ticks.push(self.apply(i, percent));
        }

        ticks
    }

    /// `size` drift ticks spread over random assets, no leader moves.
    pub fn generate_stress_cycle(&mut self, size: usize) -> Vec<RawTick> {
        let n = self.assets.len();
        (0..size)
            .map(|_| {
                let i = self.rng.gen_range(0..n);
                let percent = self.rng.gen_range(-0.5..0.5);
                self.apply(i, percent)
            })
            .collect()
    }

    fn schedule_followers(&mut self, leader: usize, sign: f64) {
        for asset in 0..self.assets.len() {
            if asset == leader {
                continue;
            }
            let same = self.rng.gen_bool(self.follow_probability.clamp(0.0, 1.0));
            let magnitude = self.rng.gen_range(0.2..1.5);
            self.pending.push(PendingMove {
                asset,
                percent: if same { sign * magnitude } else { -sign * magnitude },
                cycles_left: self.rng.gen_range(0..5),
            });
        }
    }

    fn apply(&mut self, asset: usize, percent: f64) -> RawTick {
        let price = &mut self.prices[asset];
        *price *= 1.0 + percent / 100.0;
        if *price <= 0.0 {
            *price = f64::MIN_POSITIVE;
        }
        RawTick::new(self.assets[asset].clone(), *price)
    }
}
