use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{RunSettings, SourceKind};
use crate::engine::{self, CausalityEngine, SharedEngine};
use crate::feed::{self, FeedConfig, FeedStatus};
use crate::generator::TickGenerator;
use crate::persistence;
use crate::types::RawTick;

/// A running engine with its feed, tick worker and persistence tasks.
pub struct Pipeline {
    pub engine: SharedEngine,
    pub feed_status: watch::Receiver<FeedStatus>,
    shutdown_tx: watch::Sender<bool>,
    flush_tx: watch::Sender<bool>,
    feed_task: JoinHandle<()>,
    worker_task: JoinHandle<()>,
    persist_task: Option<JoinHandle<()>>,
}

pub async fn setup(settings: &RunSettings) -> Result<Pipeline, Box<dyn std::error::Error>> {
    let engine = CausalityEngine::new(settings.universe.clone(), settings.engine.clone()).shared();
    info!(
        "engine up: {} assets, {} pairs, move >= {}%, follow >= {}%, window {}ms",
        settings.universe.len(),
        engine.lock().matrix().pair_count(),
        settings.engine.move_threshold,
        settings.engine.follow_threshold,
        settings.engine.lag_window_ms
    );

    if settings.restore {
        if let Some(path) = &settings.snapshot_path {
            persistence::restore(&engine, path).await;
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (flush_tx, flush_rx) = watch::channel(false);
    let (status_tx, feed_status) = watch::channel(FeedStatus::Connecting);
    let (tick_tx, tick_rx) = mpsc::channel::<RawTick>(settings.queue_capacity);

    let worker_task = tokio::spawn(engine::run_tick_worker(engine.clone(), tick_rx));

    let feed_task = match settings.source {
        SourceKind::Binance => {
            let cfg = FeedConfig::binance(settings.universe.assets())
                .with_reconnect_delay(settings.reconnect_delay);
            tokio::spawn(feed::run_binance(cfg, tick_tx, status_tx, shutdown_rx))
        }
        SourceKind::Synthetic => {
            let gen = TickGenerator::new(settings.universe.assets(), settings.leader_rate);
            tokio::spawn(feed::run_synthetic(
                gen,
                settings.synthetic_interval,
                tick_tx,
                status_tx,
                shutdown_rx,
            ))
        }
    };

    let persist_task = settings.snapshot_path.clone().map(|path| {
        tokio::spawn(persistence::run(
            engine.clone(),
            path,
            settings.snapshot_interval,
            flush_rx,
        ))
    });

    Ok(Pipeline {
        engine,
        feed_status,
        shutdown_tx,
        flush_tx,
        feed_task,
        worker_task,
        persist_task,
    })
}

impl Pipeline {
    /// Fires when shutdown starts. For tasks outside the pipeline.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn feed_status(&self) -> FeedStatus {
        *self.feed_status.borrow()
    }

    /// Stops ingestion, lets the worker drain what is queued, then flushes
    /// a final snapshot.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.feed_task.await;
        let _ = self.worker_task.await;
        let _ = self.flush_tx.send(true);
        if let Some(task) = self.persist_task {
            let _ = task.await;
        }
        info!("pipeline stopped");
    }
}
