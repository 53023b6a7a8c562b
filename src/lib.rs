//! Real-time lead-follow causality engine.
//!
//! Ticks flow price tracker -> leader ledger -> correlator, one at a time,
//! into a dense matrix of per-pair follow statistics. Everything else here
//! feeds ticks in or reads projections out.

pub mod config;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod feed;
pub mod generator;
pub mod latency;
pub mod ledger;
pub mod matrix;
pub mod persistence;
pub mod pipeline;
pub mod prices;
pub mod query;
pub mod stress;
pub mod tui;
pub mod types;
pub mod web;
