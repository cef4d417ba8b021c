//! Shared fixtures for the integration tests: settings, a scripted venue and price paths.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use rsi_ema_bot::config::{Args, Limits, MarketMode, Settings, Sizing};
use rsi_ema_bot::domain::{OrderOutcome, OrderRequest, OrderStatus, PriceSample, Side};
use rsi_ema_bot::execution::RetryPolicy;
use rsi_ema_bot::gateway::{ExchangeGateway, GatewayError};
use rsi_ema_bot::indicators::IndicatorParams;
use rsi_ema_bot::strategy::SignalParams;

pub const PAIR: &str = "BTCUSDT";

pub fn settings(limits: Limits) -> Settings {
    Settings {
        args: Args {
            pairs: vec![PAIR.to_string()],
            record_file: None,
            metrics_port: 0,
            log_json: false,
            feed_mode: MarketMode::Mock,
            venue_mode: MarketMode::Mock,
            binance_ws_url: String::new(),
            binance_rest_url: String::new(),
            binance_recv_window: 5000,
            binance_credentials: None,
            kline_interval: "1m".into(),
            mock_tick: Duration::from_millis(10),
            mock_fill: Duration::ZERO,
            mock_fail_rate: 0.0,
            feed_stale: Duration::from_secs(120),
            perf_every: Duration::from_secs(3600),
        },
        // RSI 14 with a short EMA pair so a cross fits in a small path
        indicators: IndicatorParams { rsi_period: 14, ema_fast: 3, ema_slow: 8 },
        signals: SignalParams::default(),
        limits,
        retry: RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            submit_timeout: Duration::from_secs(5),
        },
    }
}

pub fn limits() -> Limits {
    Limits {
        sizing: Sizing::FixedFraction(dec!(0.2)),
        capital: dec!(1000),
        qty_decimals: 6,
        stop_loss_pct: dec!(0.05),
        take_profit_pct: dec!(0.10),
        max_daily_trades: 10,
        max_daily_loss: dec!(100),
    }
}

pub fn at(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, hour, min, 0).unwrap()
}

/// Steady decline, a flat stretch, then one uptick: RSI(14) ~ 14 and the
/// 3/8 EMA golden cross happen together on the last sample only.
pub fn oversold_cross_closes() -> Vec<Decimal> {
    let mut px: Vec<Decimal> = (0..21).map(|i| Decimal::from(200 - 2 * i)).collect();
    px.extend(std::iter::repeat(dec!(160)).take(10));
    px.push(dec!(162));
    px
}

pub fn samples_from(start: DateTime<Utc>, closes: &[Decimal]) -> Vec<PriceSample> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| PriceSample { pair: PAIR.into(), ts: start + chrono::Duration::minutes(i as i64), close: *c })
        .collect()
}

pub fn fill(id: &str, side: Side, px: Decimal, qty: Decimal) -> OrderOutcome {
    OrderOutcome {
        client_order_id: id.into(),
        pair: PAIR.into(),
        side,
        status: OrderStatus::Filled,
        fill_price: Some(px),
        filled_qty: qty,
        exchange_order_id: Some(format!("x-{id}")),
        error: None,
        attempts: 1,
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Transient,
    Reject,
    FillAt(Decimal),
}

/// Venue that answers submits from a script; an empty script fills at the reference price.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Reply>>,
    pub submitted: Mutex<Vec<OrderRequest>>,
}

impl ScriptedGateway {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self { script: Mutex::new(replies.into_iter().collect()), submitted: Mutex::new(Vec::new()) }
    }

    pub fn submits(&self) -> Vec<OrderRequest> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeGateway for ScriptedGateway {
    fn venue(&self) -> &str { "scripted" }

    async fn submit(&self, req: &OrderRequest) -> Result<OrderOutcome, GatewayError> {
        self.submitted.lock().unwrap().push(req.clone());
        let reply = self.script.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Transient) => Err(GatewayError::Transient("503 service unavailable".into())),
            Some(Reply::Reject) => Err(GatewayError::Rejected("-2010 insufficient balance".into())),
            Some(Reply::FillAt(px)) => Ok(OrderOutcome::filled(req, OrderStatus::Filled, px, req.quantity, Some("1".into()))),
            None => Ok(OrderOutcome::filled(req, OrderStatus::Filled, req.reference_price, req.quantity, Some("1".into()))),
        }
    }

    async fn query_status(&self, _pair: &str, _client_order_id: &str) -> Result<Option<OrderOutcome>, GatewayError> {
        Ok(None)
    }
}
