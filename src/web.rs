use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use crate::config::RunSettings;
use crate::engine::{EngineHealth, SharedEngine};
use crate::feed::FeedStatus;
use crate::pipeline;
use crate::query::MatrixEntry;
use crate::types::{now_ms, BestPairsResponse, HistoryResponse, PricesResponse};

pub struct AppState {
    pub engine: SharedEngine,
    pub tx: broadcast::Sender<String>,
    pub clients: AtomicUsize,
    pub feed_status: watch::Receiver<FeedStatus>,
}

impl AppState {
    pub fn new(engine: SharedEngine, feed_status: watch::Receiver<FeedStatus>) -> Arc<Self> {
        let (tx, _) = broadcast::channel::<String>(256);
        Arc::new(Self {
            engine,
            tx,
            clients: AtomicUsize::new(0),
            feed_status,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub engine: EngineHealth,
    pub connected_clients: usize,
    pub upstream: FeedStatus,
}

#[derive(Debug, Deserialize)]
pub struct BestPairsParams {
    #[serde(rename = "minSamples")]
    pub min_samples: Option<u64>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/prices", get(prices))
        .route("/api/history/:asset", get(history))
        .route("/api/causality", get(causality))
        .route("/api/best-pairs", get(best_pairs))
        .route("/api/export/csv", get(export_csv))
        .fallback_service(ServeDir::new("static"))
        .with_state(state)
}

pub async fn run(
    port: u16,
    settings: RunSettings,
    batch_interval: Duration,
    duration: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = pipeline::setup(&settings).await?;
    let state = AppState::new(pipeline.engine.clone(), pipeline.feed_status.clone());

    tokio::spawn(run_broadcaster(
        state.clone(),
        batch_interval,
        pipeline.shutdown_signal(),
    ));

    let addr = format!("0.0.0.0:{port}");
    info!("dashboard at http://localhost:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_trigger(duration))
        .await?;

    pipeline.shutdown().await;
    Ok(())
}

async fn shutdown_trigger(duration: u64) {
    if duration == 0 {
        let _ = tokio::signal::ctrl_c().await;
    } else {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = tokio::time::sleep(Duration::from_secs(duration)) => {}
        }
    }
    info!("shutting down");
}

/// Sends a `batch_update` every interval when any asset ticked since the
/// last one. Also expires stale leader events during quiet periods.
pub async fn run_broadcaster(
    state: Arc<AppState>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let now = now_ms();
        let update = {
            let mut engine = state.engine.lock();
            let pruned = engine.prune_expired(now);
            if pruned > 0 {
                debug!("swept {} expired leader events", pruned);
            }
            engine.take_batch_update(now)
        };
        if update.updates.is_empty() {
            continue;
        }
        match serde_json::to_string(&update) {
            Ok(json) => {
                let _ = state.tx.send(json);
            }
            Err(e) => warn!("failed to serialise batch update: {e}"),
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut rx = state.tx.subscribe();
    let connected = state.clients.fetch_add(1, Ordering::Relaxed) + 1;
    info!("dashboard client connected ({} total)", connected);

    let initial = state.engine.lock().initial_state();
    let sent = match serde_json::to_string(&initial) {
        Ok(json) => socket.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!("failed to serialise initial state: {e}");
            false
        }
    };

    if sent {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if socket.send(Message::Text(msg)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("dashboard client lagged, skipped {} batches", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    let remaining = state.clients.fetch_sub(1, Ordering::Relaxed) - 1;
    info!("dashboard client disconnected ({} remaining)", remaining);
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let engine = state.engine.lock().health();
    Json(HealthResponse {
        status: "ok",
        engine,
        connected_clients: state.clients.load(Ordering::Relaxed),
        upstream: *state.feed_status.borrow(),
    })
}

pub async fn prices(State(state): State<Arc<AppState>>) -> Json<PricesResponse> {
    let engine = state.engine.lock();
    Json(PricesResponse {
        prices: engine.prices(),
        statistics: engine.statistics(),
    })
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(asset): Path<String>,
) -> Result<Json<HistoryResponse>, (StatusCode, Json<serde_json::Value>)> {
    let result = {
        let engine = state.engine.lock();
        let points = engine.config().history_query_points;
        engine.recent_history(&asset, points)
    };
    match result {
        Ok(history) => Ok(Json(HistoryResponse { asset, history })),
        Err(e) => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": e.to_string() })),
        )),
    }
}

pub async fn causality(
    State(state): State<Arc<AppState>>,
) -> Json<BTreeMap<String, BTreeMap<String, MatrixEntry>>> {
    let view = state.engine.lock().matrix_view();
    Json(view.snapshot())
}

pub async fn best_pairs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BestPairsParams>,
) -> Json<BestPairsResponse> {
    let (view, config) = {
        let engine = state.engine.lock();
        (engine.matrix_view(), engine.config().clone())
    };
    let min_samples = params.min_samples.unwrap_or(config.default_min_samples);
    Json(BestPairsResponse {
        min_samples,
        pairs: view.best_pairs_with(&config, Some(min_samples)),
    })
}

pub async fn export_csv(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let view = state.engine.lock().matrix_view();
    (
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"causality_matrix.csv\"",
            ),
        ],
        view.to_csv(),
    )
}
