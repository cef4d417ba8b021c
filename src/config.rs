// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : rsi_ema_bot — async RSI/EMA crypto trading engine in Rust
Module  : config.rs
Version : 0.6.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Streams per-pair close prices (mock/Binance klines), maintains
          incremental RSI + dual EMA, gates entries through daily risk
          limits, executes market orders with bounded retry, tracks
          positions/PnL, exposes Prometheus metrics, records JSONL events.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::env;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::time::Duration;

use ahash::AHashSet;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::execution::RetryPolicy;
use crate::indicators::IndicatorParams;
use crate::strategy::SignalParams;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?} ({reason})")]
    Parse { key: String, value: String, reason: String },
    #[error("{key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Mode sumber market data / venue trading
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarketMode {
    Mock,
    BinanceSandbox,
    BinanceMainnet,
}

impl MarketMode {
    pub fn from_env(key: &str, default_mode: MarketMode) -> Result<MarketMode, ConfigError> {
        match env::var(key) {
            Ok(v) => MarketMode::parse(&v).ok_or_else(|| ConfigError::Parse {
                key: key.to_string(),
                value: v,
                reason: "expected mock|binance_sandbox|binance_mainnet".into(),
            }),
            Err(_) => Ok(default_mode),
        }
    }

    pub fn parse(s: &str) -> Option<MarketMode> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock"             => Some(MarketMode::Mock),
            "binance_sandbox"  => Some(MarketMode::BinanceSandbox),
            "binance_mainnet"  => Some(MarketMode::BinanceMainnet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketMode::Mock => "mock",
            MarketMode::BinanceSandbox => "binance_sandbox",
            MarketMode::BinanceMainnet => "binance_mainnet",
        }
    }

    // Endpoint default per mode
    pub fn default_ws_url(&self) -> &'static str {
        match self {
            MarketMode::Mock            => "wss://testnet.binance.vision/ws", // tidak dipakai saat mock
            MarketMode::BinanceSandbox  => "wss://testnet.binance.vision/ws",
            MarketMode::BinanceMainnet  => "wss://stream.binance.com:9443/ws",
        }
    }

    pub fn default_rest_url(&self) -> &'static str {
        match self {
            MarketMode::Mock            => "https://testnet.binance.vision", // placeholder
            MarketMode::BinanceSandbox  => "https://testnet.binance.vision",
            MarketMode::BinanceMainnet  => "https://api.binance.com",
        }
    }
}

/// Position sizing rule for entries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sizing {
    /// Fraction of `Limits::capital` per trade.
    FixedFraction(Decimal),
    /// Same base quantity every trade.
    FixedQuantity(Decimal),
}

#[derive(Clone, Debug)]
pub struct Limits {
    pub sizing: Sizing,
    pub capital: Decimal,
    pub qty_decimals: u32,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub max_daily_trades: u32,
    pub max_daily_loss: Decimal,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            sizing: Sizing::FixedFraction(dec!(0.2)),
            capital: dec!(1000),
            qty_decimals: 6,
            stop_loss_pct: dec!(0.005),
            take_profit_pct: dec!(0.008),
            max_daily_trades: 50,
            max_daily_loss: dec!(100),
        }
    }
}

/// Binance API credentials. `Debug` never prints the secret.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("api_key", &self.api_key).field("api_secret", &"***").finish()
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    pub pairs: Vec<String>,

    // files/metrics
    pub record_file: Option<String>,
    pub metrics_port: u16,
    pub log_json: bool,

    // market mode
    pub feed_mode: MarketMode,
    pub venue_mode: MarketMode,
    pub binance_ws_url: String,
    pub binance_rest_url: String,
    pub binance_recv_window: u64,
    /// Required when `venue_mode` is a Binance mode.
    pub binance_credentials: Option<Credentials>,
    pub kline_interval: String,

    // mock adapters
    pub mock_tick: Duration,
    pub mock_fill: Duration,
    pub mock_fail_rate: f64,

    pub feed_stale: Duration,
    pub perf_every: Duration,
}

/// Everything the binary needs, grouped per component.
#[derive(Clone, Debug)]
pub struct Settings {
    pub args: Args,
    pub indicators: IndicatorParams,
    pub signals: SignalParams,
    pub limits: Limits,
    pub retry: RetryPolicy,
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map_err(|e| ConfigError::Parse {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}

/// Comma list to upper-case pairs, first occurrence wins.
fn parse_pairs(raw: &str) -> Vec<String> {
    let mut seen = AHashSet::new();
    raw.split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(|x| x.to_ascii_uppercase())
        .filter(|x| seen.insert(x.clone()))
        .collect()
}

fn credentials() -> Option<Credentials> {
    let key = env::var("BINANCE_API_KEY").ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())?;
    let secret = env::var("BINANCE_API_SECRET").ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())?;
    Some(Credentials { api_key: key, api_secret: secret })
}

fn ensure(cond: bool, key: &'static str, reason: impl Into<String>) -> Result<(), ConfigError> {
    if cond { Ok(()) } else { Err(ConfigError::Invalid { key, reason: reason.into() }) }
}

pub fn load() -> Result<Settings, ConfigError> {
    // Pastikan .env dibaca (agar TRADING_PAIRS, RECORD_FILE, dll ter-load)
    let _ = dotenvy::dotenv();
    from_env()
}

/// Build settings from the current process environment (no `.env` lookup).
pub fn from_env() -> Result<Settings, ConfigError> {
    // ===== Pairs =====
    // TRADING_PAIRS=BTCUSDT,ETHUSDT,SOLUSDT
    let pairs = parse_pairs(&env::var("TRADING_PAIRS").unwrap_or_else(|_| "BTCUSDT".into()));
    ensure(!pairs.is_empty(), "TRADING_PAIRS", "at least one pair required")?;

    // ===== Mode =====
    let feed_mode  = MarketMode::from_env("FEED_MODE",  MarketMode::Mock)?;
    let venue_mode = MarketMode::from_env("VENUE_MODE", MarketMode::Mock)?;

    let binance_ws_url = env::var("BINANCE_WS_URL")
        .unwrap_or_else(|_| feed_mode.default_ws_url().to_string());
    let binance_rest_url = env::var("BINANCE_REST_URL")
        .unwrap_or_else(|_| venue_mode.default_rest_url().to_string());

    let args = Args {
        pairs,
        record_file: env::var("RECORD_FILE").ok().filter(|s| !s.trim().is_empty()),
        metrics_port: parse_env("METRICS_PORT", 9898u16)?,
        log_json: env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false),
        feed_mode,
        venue_mode,
        binance_ws_url,
        binance_rest_url,
        binance_recv_window: parse_env("BINANCE_RECV_WINDOW", 5000u64)?,
        binance_credentials: credentials(),
        kline_interval: env::var("KLINE_INTERVAL").unwrap_or_else(|_| "1m".into()),
        mock_tick: Duration::from_millis(parse_env("MOCK_TICK_MS", 1000u64)?),
        mock_fill: Duration::from_millis(parse_env("MOCK_FILL_MS", 5u64)?),
        mock_fail_rate: parse_env("MOCK_FAIL_RATE", 0.0f64)?,
        feed_stale: Duration::from_secs(parse_env("FEED_STALE_SECS", 120u64)?),
        perf_every: Duration::from_secs(parse_env("PERF_SNAPSHOT_SECS", 300u64)?),
    };
    ensure((0.0..=1.0).contains(&args.mock_fail_rate), "MOCK_FAIL_RATE", "must be within [0,1]")?;
    ensure(!args.perf_every.is_zero(), "PERF_SNAPSHOT_SECS", "must be > 0")?;
    ensure(!args.feed_stale.is_zero(), "FEED_STALE_SECS", "must be > 0")?;
    ensure(
        args.venue_mode == MarketMode::Mock || args.binance_credentials.is_some(),
        "BINANCE_API_KEY",
        format!("BINANCE_API_KEY and BINANCE_API_SECRET required for VENUE_MODE={}", args.venue_mode.as_str()),
    )?;

    // ===== Indicators / signal thresholds =====
    let indicators = IndicatorParams {
        rsi_period: parse_env("RSI_PERIOD", 14usize)?,
        ema_fast: parse_env("EMA_FAST", 12usize)?,
        ema_slow: parse_env("EMA_SLOW", 26usize)?,
    };
    ensure(indicators.rsi_period >= 1, "RSI_PERIOD", "must be >= 1")?;
    ensure(indicators.ema_fast >= 1, "EMA_FAST", "must be >= 1")?;
    ensure(indicators.ema_fast < indicators.ema_slow, "EMA_SLOW", "must be greater than EMA_FAST")?;

    let signals = SignalParams {
        oversold: parse_env("RSI_OVERSOLD", 30.0f64)?,
        overbought: parse_env("RSI_OVERBOUGHT", 70.0f64)?,
    };
    ensure(
        0.0 <= signals.oversold && signals.oversold < signals.overbought && signals.overbought <= 100.0,
        "RSI_OVERSOLD",
        "need 0 <= RSI_OVERSOLD < RSI_OVERBOUGHT <= 100",
    )?;

    // ===== Limits =====
    let capital: Decimal = parse_env("INITIAL_CAPITAL", dec!(1000))?;
    let sizing = match env::var("POSITION_SIZING").unwrap_or_else(|_| "fraction".into()).to_ascii_lowercase().as_str() {
        "fraction" => Sizing::FixedFraction(parse_env("POSITION_FRACTION", dec!(0.2))?),
        "fixed" => Sizing::FixedQuantity(parse_env("POSITION_QTY", dec!(0.001))?),
        other => {
            return Err(ConfigError::Parse {
                key: "POSITION_SIZING".into(),
                value: other.into(),
                reason: "expected fraction|fixed".into(),
            })
        }
    };
    match sizing {
        Sizing::FixedFraction(f) => ensure(f > Decimal::ZERO && f <= Decimal::ONE, "POSITION_FRACTION", "must be within (0,1]")?,
        Sizing::FixedQuantity(q) => ensure(q > Decimal::ZERO, "POSITION_QTY", "must be > 0")?,
    }

    let loss_pct: Decimal = parse_env("MAX_DAILY_LOSS_PCT", dec!(0.10))?;
    let limits = Limits {
        sizing,
        capital,
        qty_decimals: parse_env("QTY_DECIMALS", 6u32)?,
        stop_loss_pct: parse_env("STOP_LOSS_PCT", dec!(0.005))?,
        take_profit_pct: parse_env("TAKE_PROFIT_PCT", dec!(0.008))?,
        max_daily_trades: parse_env("MAX_DAILY_TRADES", 50u32)?,
        // MAX_DAILY_LOSS (absolut) menang atas persentase modal
        max_daily_loss: parse_env("MAX_DAILY_LOSS", capital * loss_pct)?,
    };
    ensure(limits.capital > Decimal::ZERO, "INITIAL_CAPITAL", "must be > 0")?;
    ensure(limits.qty_decimals <= 18, "QTY_DECIMALS", "must be <= 18")?;
    ensure(
        limits.stop_loss_pct > Decimal::ZERO && limits.stop_loss_pct < Decimal::ONE,
        "STOP_LOSS_PCT",
        "must be within (0,1)",
    )?;
    ensure(limits.take_profit_pct > Decimal::ZERO, "TAKE_PROFIT_PCT", "must be > 0")?;
    ensure(limits.max_daily_trades >= 2, "MAX_DAILY_TRADES", "must allow one round trip (>= 2)")?;
    ensure(limits.max_daily_loss > Decimal::ZERO, "MAX_DAILY_LOSS", "must be > 0")?;

    // ===== Execution =====
    let retry = RetryPolicy {
        max_attempts: parse_env("ORDER_MAX_ATTEMPTS", 3u32)?,
        base_backoff: Duration::from_millis(parse_env("ORDER_BACKOFF_MS", 500u64)?),
        max_backoff: Duration::from_secs(10),
        submit_timeout: Duration::from_millis(parse_env("ORDER_TIMEOUT_MS", 10_000u64)?),
    };
    ensure(retry.max_attempts >= 1, "ORDER_MAX_ATTEMPTS", "must be >= 1")?;
    ensure(!retry.submit_timeout.is_zero(), "ORDER_TIMEOUT_MS", "must be > 0")?;

    Ok(Settings { args, indicators, signals, limits, retry })
}
