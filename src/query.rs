//! Read-side projections over a copied matrix. Nothing here touches the
//! live engine; callers take a [`MatrixView`] under the lock and release it
//! before projecting.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::matrix::{CausalityMatrix, CausalityRelation};

pub const CSV_HEADER: &str = "Leader,Follower,Successful_Follows,Missed_Follows,Follow_Rate,Avg_Lag_MS,Avg_Magnitude_Ratio,Sample_Size";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairStats {
    pub leader: String,
    pub follower: String,
    pub successful_follows: u64,
    pub missed_follows: u64,
    pub follow_rate: f64,
    pub avg_lag: f64,
    pub avg_magnitude: f64,
    pub sample_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixEntry {
    pub follow_rate: f64,
    pub avg_lag: f64,
    pub avg_magnitude: f64,
    pub sample_size: u64,
}

/// Asset names plus a copy of the matrix, detached from the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixView {
    assets: Vec<String>,
    matrix: CausalityMatrix,
}

impl MatrixView {
    pub fn new(assets: Vec<String>, matrix: CausalityMatrix) -> Self {
        Self { assets, matrix }
    }

    fn pairs(&self) -> impl Iterator<Item = (&str, &str, &CausalityRelation)> + '_ {
        self.matrix
            .iter()
            .map(|(l, f, rel)| (self.assets[l].as_str(), self.assets[f].as_str(), rel))
    }

    /// Pairs with at least `min_samples` observations and a follow rate above
    /// `min_follow_rate`, highest rate first, at most `limit` of them.
    pub fn best_pairs(&self, min_samples: u64, min_follow_rate: f64, limit: usize) -> Vec<PairStats> {
        let mut pairs: Vec<PairStats> = self
            .pairs()
            .filter(|(_, _, rel)| rel.total() >= min_samples && rel.follow_rate() > min_follow_rate)
            .map(|(leader, follower, rel)| pair_stats(leader, follower, rel))
            .collect();
        pairs.sort_by(|a, b| b.follow_rate.total_cmp(&a.follow_rate));
        pairs.truncate(limit);
        pairs
    }

    pub fn best_pairs_with(&self, config: &EngineConfig, min_samples: Option<u64>) -> Vec<PairStats> {
        self.best_pairs(
            min_samples.unwrap_or(config.default_min_samples),
            config.min_follow_rate,
            config.best_pairs_limit,
        )
    }

    /// leader -> follower -> stats, for every pair with at least one success.
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, MatrixEntry>> {
        let mut out: BTreeMap<String, BTreeMap<String, MatrixEntry>> = BTreeMap::new();
        for (leader, follower, rel) in self.pairs() {
            if rel.successful_follows == 0 {
                continue;
            }
            out.entry(leader.to_string()).or_default().insert(
                follower.to_string(),
                MatrixEntry {
                    follow_rate: rel.follow_rate(),
                    avg_lag: rel.avg_lag(),
                    avg_magnitude: rel.avg_magnitude(),
                    sample_size: rel.samples,
                },
            );
        }
        out
    }

    /// One row per observed pair, under [`CSV_HEADER`].
    pub fn to_csv(&self) -> String {
        let mut csv = String::from(CSV_HEADER);
        csv.push('\n');
        for (leader, follower, rel) in self.pairs() {
            if rel.total() == 0 {
                continue;
            }
            let _ = writeln!(
                csv,
                "{},{},{},{},{:.3},{:.0},{:.3},{}",
                leader,
                follower,
                rel.successful_follows,
                rel.missed_follows,
                rel.follow_rate(),
                rel.avg_lag(),
                rel.avg_magnitude(),
                rel.samples
            );
        }
        csv
    }
}

fn pair_stats(leader: &str, follower: &str, rel: &CausalityRelation) -> PairStats {
    PairStats {
        leader: leader.to_string(),
        follower: follower.to_string(),
        successful_follows: rel.successful_follows,
        missed_follows: rel.missed_follows,
        follow_rate: rel.follow_rate(),
        avg_lag: rel.avg_lag(),
        avg_magnitude: rel.avg_magnitude(),
        sample_size: rel.samples,
    }
}
