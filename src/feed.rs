//! Upstream tick sources
//!
//! Both sources push `RawTick`s into the one queue the tick worker drains,
//! and publish their connection status on a watch channel.

use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::generator::TickGenerator;
use crate::types::RawTick;

const BINANCE_STREAM_URL: &str = "wss://stream.binance.com:9443/stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,
}

impl FeedConfig {
    /// Combined mini-ticker stream for every asset.
    pub fn binance(assets: &[String]) -> Self {
        let streams: Vec<String> = assets
            .iter()
            .map(|a| format!("{}@miniTicker", a.to_lowercase()))
            .collect();
        Self {
            url: format!("{}?streams={}", BINANCE_STREAM_URL, streams.join("/")),
            reconnect_delay: Duration::from_secs(5),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

#[derive(Deserialize)]
struct CombinedMessage {
    data: MiniTicker,
}

#[derive(Deserialize)]
struct MiniTicker {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    close: PriceField,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PriceField {
    Text(String),
    Number(f64),
}

/// Parses a mini-ticker payload, wrapped in a combined-stream envelope or bare.
pub fn parse_ticker(payload: &str) -> Result<RawTick, FeedError> {
    let ticker = match serde_json::from_str::<CombinedMessage>(payload) {
        Ok(combined) => combined.data,
        Err(_) => serde_json::from_str::<MiniTicker>(payload)
            .map_err(|e| FeedError::Malformed(e.to_string()))?,
    };
    let price = match ticker.close {
        PriceField::Text(s) => s
            .parse::<f64>()
            .map_err(|e| FeedError::Malformed(format!("price {s:?}: {e}")))?,
        PriceField::Number(n) => n,
    };
    if !price.is_finite() {
        return Err(FeedError::Malformed(format!("non-finite price for {}", ticker.symbol)));
    }
    Ok(RawTick::new(ticker.symbol.to_uppercase(), price))
}

/// Connects, forwards ticks, and on any disconnect waits the fixed delay and
/// tries again. Returns on shutdown or when the tick queue closes.
pub async fn run_binance(
    config: FeedConfig,
    tx: mpsc::Sender<RawTick>,
    status: watch::Sender<FeedStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("starting upstream feed {}", config.url);

    loop {
        let _ = status.send(FeedStatus::Connecting);

        let connected = tokio::select! {
            res = connect_async(config.url.as_str()) => res.map_err(|e| FeedError::Connect {
                url: config.url.clone(),
                reason: e.to_string(),
            }),
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok((ws_stream, _)) => {
                info!("upstream feed connected");
                let _ = status.send(FeedStatus::Connected);
                let (_write, mut read) = ws_stream.split();

                loop {
                    let msg = tokio::select! {
                        msg = read.next() => msg,
                        _ = shutdown.changed() => {
                            let _ = status.send(FeedStatus::Disconnected);
                            return;
                        }
                    };
                    match msg {
                        Some(Ok(Message::Text(text))) => match parse_ticker(text.as_str()) {
                            Ok(tick) => {
                                if tx.send(tick).await.is_err() {
                                    let _ = status.send(FeedStatus::Disconnected);
                                    return;
                                }
                            }
                            Err(e) => warn!("{e}"),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            warn!("upstream closed connection: {:?}", frame);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("{}", FeedError::Socket(e.to_string()));
                            break;
                        }
                        None => break,
                    }
                }
            }
            Err(e) => warn!("{e}"),
        }

        let _ = status.send(FeedStatus::Disconnected);
        debug!("reconnecting in {:?}", config.reconnect_delay);
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    let _ = status.send(FeedStatus::Disconnected);
    info!("upstream feed stopped");
}

/// Feeds generated ticks at a fixed cadence. Always reports connected.
pub async fn run_synthetic(
    mut generator: TickGenerator,
    every: Duration,
    tx: mpsc::Sender<RawTick>,
    status: watch::Sender<FeedStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    let _ = status.send(FeedStatus::Connected);
    let mut ticker = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for tick in generator.generate_cycle() {
                    if tx.send(tick).await.is_err() {
                        let _ = status.send(FeedStatus::Disconnected);
                        return;
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    let _ = status.send(FeedStatus::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_combined_stream_envelope() {
        let payload = r#"{"stream":"btcusdt@miniTicker","data":{"e":"24hrMiniTicker","E":1700000000000,"s":"BTCUSDT","c":"67012.50","o":"66000.00"}}"#;
        let tick = parse_ticker(payload).unwrap();
        assert_eq!(tick.asset, "BTCUSDT");
        assert!((tick.price - 67012.5).abs() < 1e-9);
    }

    #[test]
    fn parses_bare_ticker_with_numeric_price() {
        let tick = parse_ticker(r#"{"s":"ethusdt","c":3400.25}"#).unwrap();
        assert_eq!(tick.asset, "ETHUSDT");
        assert!((tick.price - 3400.25).abs() < 1e-9);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_ticker("not json"), Err(FeedError::Malformed(_))));
        assert!(matches!(
            parse_ticker(r#"{"s":"BTCUSDT","c":"abc"}"#),
            Err(FeedError::Malformed(_))
        ));
        assert!(matches!(parse_ticker(r#"{"data":{}}"#), Err(FeedError::Malformed(_))));
    }

    #[test]
    fn binance_url_lists_every_stream() {
        let cfg = FeedConfig::binance(&["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        assert!(cfg.url.ends_with("?streams=btcusdt@miniTicker/ethusdt@miniTicker"));
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(5));
    }
}
