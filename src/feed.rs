// ===============================
// src/feed.rs
// ===============================
//
// Market Data adapters:
// - MarketFeed    : kapabilitas yang dikonsumsi PairEngine (satu sample per panggilan)
// - ChannelFeed   : MarketFeed di atas mpsc::Receiver + timeout staleness
// - run_mock      : random-walk generator, satu close per MOCK_TICK_MS
// - run_binance   : Binance WS kline stream (Sandbox & Mainnet), emit saat kline close
//                   pass the WS base URL from config (no hardcoded ENV)
//
// Producer (run_mock/run_binance) dan consumer (ChannelFeed) dipisah per pair:
// tiap pair punya channel sendiri, tidak ada broadcast bersama.
//
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt; // for .next()
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};
use url::Url;

use crate::binance::KlineEnvelope;
use crate::domain::PriceSample;
use crate::metrics::{FEED_WS_CONNECTED, FEED_WS_RECONNECTS};

#[derive(Debug, Error, PartialEq)]
pub enum FeedError {
    /// No new data within the staleness window: skip this tick.
    #[error("{0}: no data for {1:?}")]
    Unavailable(String, Duration),
    /// Producer is gone; the pair loop should end.
    #[error("{0}: feed closed")]
    Closed(String),
}

#[async_trait]
pub trait MarketFeed: Send {
    async fn next_sample(&mut self, pair: &str) -> Result<PriceSample, FeedError>;
}

/// Per-pair receiving end of a producer task.
pub struct ChannelFeed {
    rx: mpsc::Receiver<PriceSample>,
    stale_after: Duration,
}

impl ChannelFeed {
    pub fn new(rx: mpsc::Receiver<PriceSample>, stale_after: Duration) -> Self {
        Self { rx, stale_after }
    }

    /// Producer sender + feed pair.
    pub fn channel(capacity: usize, stale_after: Duration) -> (mpsc::Sender<PriceSample>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx, stale_after))
    }
}

#[async_trait]
impl MarketFeed for ChannelFeed {
    async fn next_sample(&mut self, pair: &str) -> Result<PriceSample, FeedError> {
        match timeout(self.stale_after, self.rx.recv()).await {
            Ok(Some(s)) => Ok(s),
            Ok(None) => Err(FeedError::Closed(pair.to_string())),
            Err(_) => Err(FeedError::Unavailable(pair.to_string(), self.stale_after)),
        }
    }
}

/// Generator market data mock (random walk, close price per tick)
pub async fn run_mock(tx: mpsc::Sender<PriceSample>, pair: String, start_px: Decimal, tick: Duration) {
    let mut px = start_px;
    let floor = start_px * dec!(0.5);
    loop {
        // jangan simpan ThreadRng melewati .await
        let bps: i64 = rand::thread_rng().gen_range(-30..=30);
        px = (px + px * Decimal::new(bps, 4)).max(floor).round_dp(2);
        let sample = PriceSample { pair: pair.clone(), ts: Utc::now(), close: px };
        if tx.send(sample).await.is_err() {
            info!(%pair, "mock feed: consumer gone, stopping");
            return;
        }
        sleep(tick).await;
    }
}

/// Adapter ke Binance WS (read-only) untuk kline (`<pair>@kline_<interval>`)
///
/// - `ws_base` diteruskan dari config:
///     * Sandbox: wss://testnet.binance.vision/ws
///     * Mainnet: wss://stream.binance.com:9443/ws
/// - `pair` adalah domain symbol (mis. "BTCUSDT") — kita lower-case saat susun topic.
/// - Hanya kline yang sudah close (`x == true`) yang jadi PriceSample.
pub async fn run_binance(tx: mpsc::Sender<PriceSample>, pair: String, ws_base: String, interval: String) {
    let topic = format!("{}@kline_{}", pair.to_lowercase(), interval);
    let ws_url = format!("{}/{}", ws_base.trim_end_matches('/'), topic);

    let mut attempt: u32 = 0;
    loop {
        let url = match Url::parse(&ws_url) {
            Ok(u) => u,
            Err(e) => {
                error!(?e, %ws_url, "bad ws url");
                return;
            }
        };

        info!(%ws_url, "connecting binance kline stream");
        match connect_async(url).await {
            Ok((mut ws, _resp)) => {
                info!(%pair, "connected to kline stream");
                FEED_WS_CONNECTED.with_label_values(&[&pair]).set(1);
                attempt = 0; // reset backoff

                while let Some(frame) = ws.next().await {
                    match frame {
                        Ok(m) if m.is_text() => {
                            let txt = match m.into_text() {
                                Ok(t) => t,
                                Err(e) => {
                                    warn!(?e, "failed to read text frame");
                                    continue;
                                }
                            };
                            let env = match serde_json::from_str::<KlineEnvelope>(&txt) {
                                Ok(env) => env,
                                Err(e) => {
                                    warn!(?e, "unexpected kline payload");
                                    continue;
                                }
                            };
                            if let Some(sample) = env.to_sample(&pair) {
                                if tx.send(sample).await.is_err() {
                                    FEED_WS_CONNECTED.with_label_values(&[&pair]).set(0);
                                    info!(%pair, "kline feed: consumer gone, stopping");
                                    return;
                                }
                            }
                        }
                        Ok(_) => {
                            // ignore non-text frames (ping/pong ditangani tungstenite)
                        }
                        Err(e) => {
                            error!(?e, "ws read error");
                            break;
                        }
                    }
                }
                FEED_WS_CONNECTED.with_label_values(&[&pair]).set(0);
                info!(%pair, "kline stream disconnected, will reconnect…");
            }
            Err(e) => {
                error!(?e, "connect failed");
            }
        }
        if tx.is_closed() {
            return;
        }
        FEED_WS_RECONNECTS.with_label_values(&[&pair]).inc();

        // Exponential backoff + jitter
        attempt = attempt.saturating_add(1);
        let shift = attempt.min(6);                  // 0..=6
        let factor = 1u64 << shift;                  // 1,2,4,...,64
        let base_ms = 500u64.saturating_mul(factor); // 0.5s..32s
        let jitter = rand::thread_rng().gen_range(0..=250);
        sleep(Duration::from_millis(base_ms + jitter)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn channel_feed_reports_stale_then_closed() {
        let (tx, mut feed) = ChannelFeed::channel(4, Duration::from_secs(30));
        let s = PriceSample { pair: "BTCUSDT".into(), ts: Utc::now(), close: dec!(1) };
        tx.send(s.clone()).await.unwrap();
        assert_eq!(feed.next_sample("BTCUSDT").await.unwrap(), s);
        assert_eq!(
            feed.next_sample("BTCUSDT").await.unwrap_err(),
            FeedError::Unavailable("BTCUSDT".into(), Duration::from_secs(30))
        );
        drop(tx);
        assert_eq!(feed.next_sample("BTCUSDT").await.unwrap_err(), FeedError::Closed("BTCUSDT".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_walk_stays_above_floor() {
        let (tx, mut feed) = ChannelFeed::channel(8, Duration::from_secs(5));
        let task = tokio::spawn(run_mock(tx, "ETHUSDT".into(), dec!(2000), Duration::from_millis(10)));
        for _ in 0..50 {
            let s = feed.next_sample("ETHUSDT").await.unwrap();
            assert_eq!(s.pair, "ETHUSDT");
            assert!(s.close >= dec!(1000));
        }
        drop(feed);
        // producer notices the closed channel on its next send
        task.await.unwrap();
    }
}
