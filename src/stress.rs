use std::time::{Duration, Instant};

use crate::config::{EngineConfig, Universe};
use crate::engine::CausalityEngine;
use crate::generator::TickGenerator;
use crate::latency::TickLatency;
use crate::types::now_ms;

struct StressLevel {
    ticks_per_cycle: usize,
    sleep_ms: u64,
    target_tps: u64,
}

const LEVELS: &[StressLevel] = &[
    StressLevel { ticks_per_cycle: 10,    sleep_ms: 100, target_tps: 100 },
    StressLevel { ticks_per_cycle: 50,    sleep_ms: 50,  target_tps: 1_000 },
    StressLevel { ticks_per_cycle: 200,   sleep_ms: 20,  target_tps: 10_000 },
    StressLevel { ticks_per_cycle: 500,   sleep_ms: 10,  target_tps: 50_000 },
    StressLevel { ticks_per_cycle: 1000,  sleep_ms: 5,   target_tps: 200_000 },
    StressLevel { ticks_per_cycle: 5000,  sleep_ms: 5,   target_tps: 1_000_000 },
];

struct LevelResult {
    level: usize,
    target_tps: u64,
    actual_tps: u64,
    total_ticks: u64,
    leader_events: u64,
    live_peak: usize,
    p50: u64,
    p95: u64,
    p99: u64,
    duration_secs: f64,
}

/// Drives an engine directly (no queue, no feed) at rising tick rates with
/// leader moves mixed in, and reports per-tick processing latency.
pub async fn run(universe: Universe, level_duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    let total_time = LEVELS.len() as u64 * level_duration;
    println!("=== STRESS TEST ===");
    println!("Assets: {}, Levels: {}, Duration per level: {}s, Total estimated: {}s",
        universe.len(), LEVELS.len(), level_duration, total_time);
    println!();

    let mut engine = CausalityEngine::new(universe.clone(), EngineConfig::default());
    let mut gen = TickGenerator::new(universe.assets(), 0.2);
    let mut latency = TickLatency::new();
    let mut results: Vec<LevelResult> = Vec::new();
    let level_dur = Duration::from_secs(level_duration);

    for (idx, level) in LEVELS.iter().enumerate() {
        let level_num = idx + 1;
        print!("Level {}/{}: target ~{} ticks/sec, {} ticks/cycle, {}ms sleep ... ",
            level_num, LEVELS.len(), level.target_tps, level.ticks_per_cycle, level.sleep_ms);

        latency.reset();
        let leaders_before = engine.statistics().leader_events_detected;
        let mut total_ticks = 0u64;
        let mut live_peak = 0usize;
        let level_start = Instant::now();

        while level_start.elapsed() < level_dur {
            let ts = now_ms();
            let mut ticks = gen.generate_cycle();
            ticks.extend(gen.generate_stress_cycle(level.ticks_per_cycle));

            for tick in &ticks {
                let started = Instant::now();
                if engine.process_tick(&tick.asset, tick.price, ts).is_ok() {
                    total_ticks += 1;
                }
                latency.record(started.elapsed());
            }
            live_peak = live_peak.max(engine.ledger().len());

            tokio::time::sleep(Duration::from_millis(level.sleep_ms)).await;
        }

        let elapsed = level_start.elapsed().as_secs_f64();
        let actual_tps = (total_ticks as f64 / elapsed) as u64;
        let stats = latency.stats();
        println!("{} ticks/sec (p99={}us)", actual_tps, stats.p99_us);

        results.push(LevelResult {
            level: level_num,
            target_tps: level.target_tps,
            actual_tps,
            total_ticks,
            leader_events: engine.statistics().leader_events_detected - leaders_before,
            live_peak,
            p50: stats.p50_us,
            p95: stats.p95_us,
            p99: stats.p99_us,
            duration_secs: elapsed,
        });
    }

    println!();
    print_results_table(&results);
    print_saturation_analysis(&results);

    let view = engine.matrix_view();
    let observed = view.to_csv().lines().count().saturating_sub(1);
    println!();
    println!("Pairs with observations: {} of {}", observed, engine.matrix().pair_count());
    Ok(())
}

fn format_latency(us: u64) -> String {
    if us >= 1_000_000 {
        format!("{:.1}s", us as f64 / 1_000_000.0)
    } else if us >= 1_000 {
        format!("{:.1}ms", us as f64 / 1_000.0)
    } else {
        format!("{}us", us)
    }
}

fn print_results_table(results: &[LevelResult]) {
    println!("{}", "=".repeat(90));
    println!("{:^90}", "STRESS TEST RESULTS");
    println!("{}", "=".repeat(90));
    println!(
        " {:<5} {:>10} {:>10} {:>9} {:>9} {:>9} {:>8} {:>6} {:>8}",
        "Level", "Target/s", "Actual/s", "p50", "p95", "p99", "Leaders", "Live", "Time"
    );
    println!("{}", "-".repeat(90));

    for r in results {
        println!(
            " {:<5} {:>10} {:>10} {:>9} {:>9} {:>9} {:>8} {:>6} {:>7.1}s",
            r.level,
            r.target_tps,
            r.actual_tps,
            format_latency(r.p50),
            format_latency(r.p95),
            format_latency(r.p99),
            r.leader_events,
            r.live_peak,
            r.duration_secs,
        );
    }

    println!("{}", "=".repeat(90));
    let total_ticks: u64 = results.iter().map(|r| r.total_ticks).sum();
    let total_time: f64 = results.iter().map(|r| r.duration_secs).sum();
    println!("Totals: {} ticks in {:.1}s", total_ticks, total_time);
}

fn print_saturation_analysis(results: &[LevelResult]) {
    println!();

    // actual below 90% of target
    let saturation = results.iter().find(|r| r.actual_tps < (r.target_tps * 90 / 100));

    if let Some(sat) = saturation {
        let pct = (sat.actual_tps as f64 / sat.target_tps as f64) * 100.0;
        println!("Saturation point: Level {} (~{} ticks/sec target)", sat.level, sat.target_tps);
        println!("  Actual throughput: {}/sec ({:.0}% of target)", sat.actual_tps, pct);
        println!("  Tick p99: {}", format_latency(sat.p99));
    } else {
        println!("No saturation detected - engine handled all load levels!");
    }

    if let Some(p) = results.iter().max_by_key(|r| r.actual_tps) {
        println!("Peak sustained throughput: ~{} ticks/sec (Level {})", p.actual_tps, p.level);
    }
}
