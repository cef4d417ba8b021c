// ===============================
// src/main.rs
// ===============================
/*
 # konfigurasi yang aktif
curl -s localhost:9898/metrics | egrep '^config_(feed_mode|venue_mode|pair)'

# aktivitas per pair
curl -s localhost:9898/metrics | grep '^price_samples_total'
curl -s localhost:9898/metrics | grep '^signals_total_by'
curl -s localhost:9898/metrics | egrep '^(pnl_realized|win_rate|daily_trade_count)'

*/
/*
=============================================================================
Project : rsi_ema_bot — async RSI/EMA crypto trading engine in Rust
Module  : main.rs
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
use std::sync::Arc;

use clap::Parser;
use rust_decimal_macros::dec;
use tokio::{
    select,
    sync::{mpsc, watch},
    task::JoinSet,
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rsi_ema_bot::config::{self, MarketMode};
use rsi_ema_bot::domain::Event;
use rsi_ema_bot::engine::PairEngine;
use rsi_ema_bot::feed::{self, ChannelFeed};
use rsi_ema_bot::gateway::{ExchangeGateway, PaperGateway};
use rsi_ema_bot::gateway_binance::BinanceGateway;
use rsi_ema_bot::{metrics, recorder};

#[derive(Parser, Debug)]
#[command(name = "rsi_ema_bot", version, about = "RSI + EMA crossover trading bot")]
struct Cli {
    /// Load variables from this file instead of ./.env
    #[arg(long)]
    env_file: Option<String>,

    /// Override TRADING_PAIRS (comma separated)
    #[arg(long)]
    pairs: Option<String>,

    /// Print the resolved configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // ---- Load config & limits ----
    if let Some(p) = &cli.pairs {
        std::env::set_var("TRADING_PAIRS", p);
    }
    let loaded = match &cli.env_file {
        Some(path) => match dotenvy::from_filename(path) {
            Ok(_) => config::from_env(),
            Err(e) => {
                eprintln!("cannot read env file {path}: {e}");
                std::process::exit(2);
            }
        },
        None => config::load(),
    };
    let settings = match loaded {
        Ok(s) => s,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(2);
        }
    };
    let args = settings.args.clone();

    // ---- Logging ----
    init_logging(args.log_json);

    if cli.print_config {
        println!("{settings:#?}");
        return;
    }

    // ---- Metrics ----
    metrics::init();
    metrics::serve_metrics(args.metrics_port);

    // ---- Human-friendly startup info + export config to metrics ----
    info!(
        feed_mode = args.feed_mode.as_str(),
        venue_mode = args.venue_mode.as_str(),
        pairs = ?args.pairs,
        rsi = settings.indicators.rsi_period,
        ema_fast = settings.indicators.ema_fast,
        ema_slow = settings.indicators.ema_slow,
        max_daily_trades = settings.limits.max_daily_trades,
        max_daily_loss = %settings.limits.max_daily_loss,
        binance_ws = %args.binance_ws_url,
        binance_rest = %args.binance_rest_url,
        "startup config"
    );
    metrics::CONFIG_FEED_MODE.with_label_values(&[args.feed_mode.as_str()]).set(1);
    metrics::CONFIG_VENUE_MODE.with_label_values(&[args.venue_mode.as_str()]).set(1);
    for p in &args.pairs {
        metrics::CONFIG_PAIR.with_label_values(&[p]).set(1);
    }

    // ---- Recorder (optional) ----
    let events = match args.record_file.clone() {
        Some(path) => {
            let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
            tokio::spawn(recorder::run(rec_rx, path));
            Some(rec_tx)
        }
        None => None,
    };

    // ---- Gateway (satu instance, dibagi semua pair) ----
    let gateway: Arc<dyn ExchangeGateway> = match args.venue_mode {
        MarketMode::Mock => Arc::new(PaperGateway::new("paper", args.mock_fill, args.mock_fail_rate)),
        MarketMode::BinanceSandbox | MarketMode::BinanceMainnet => {
            // config::from_env sudah memastikan kredensial ada untuk mode binance
            let Some(creds) = args.binance_credentials.clone() else {
                error!("BINANCE_API_KEY / BINANCE_API_SECRET required for venue mode {}", args.venue_mode.as_str());
                std::process::exit(2);
            };
            Arc::new(BinanceGateway::new(args.binance_rest_url.clone(), creds.api_key, creds.api_secret, args.binance_recv_window))
        }
    };

    // ---- Shutdown flag (ctrl-c) ----
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, stopping pair engines");
            let _ = stop_tx.send(true);
        }
    });

    // ---- FEED + engine per pair ----
    let mut engines = JoinSet::new();
    for pair in args.pairs.iter().cloned() {
        let (tx, pair_feed) = ChannelFeed::channel(1024, args.feed_stale);
        match args.feed_mode {
            MarketMode::Mock => {
                tokio::spawn(feed::run_mock(tx, pair.clone(), dec!(100), args.mock_tick));
            }
            MarketMode::BinanceSandbox | MarketMode::BinanceMainnet => {
                let base = args.binance_ws_url.clone();
                let interval = args.kline_interval.clone();
                tokio::spawn(feed::run_binance(tx, pair.clone(), base, interval));
            }
        }

        let mut engine = PairEngine::new(pair.clone(), &settings, Arc::clone(&gateway));
        if let Some(tx) = &events {
            engine = engine.with_events(tx.clone());
        }
        let stop = stop_rx.clone();
        engines.spawn(async move { (pair, engine.run(pair_feed, stop).await) });
    }
    drop(events);

    // ---- Heartbeat + join ----
    let mut heartbeat = tokio::time::interval(Duration::from_secs(60));
    loop {
        select! {
            joined = engines.join_next() => {
                match joined {
                    Some(Ok((pair, Ok(ctx)))) => info!(%pair, open = ctx.position().is_open, pnl = %ctx.stats().realized_pnl, "pair finished"),
                    Some(Ok((pair, Err(e)))) => error!(%pair, %e, "pair stopped with error"),
                    Some(Err(e)) => error!(?e, "pair task panicked"),
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                info!(running = engines.len(), stopping = *stop_rx.borrow(), "heartbeat");
            }
        }
    }
    if !*stop_rx.borrow() {
        warn!("all pair engines ended without shutdown request");
    }
    info!("bye");
}
