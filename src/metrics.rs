// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{error, info, warn};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Market data --------
pub static SAMPLES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("price_samples_total", "close-price samples consumed"), &["pair"]).unwrap()
});

// kind: stale | invalid | out_of_order
pub static DATA_GAPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("data_gaps_total", "cycles skipped for missing or unusable data"),
        &["pair", "kind"],
    )
    .unwrap()
});

pub static RSI: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("indicator_rsi", "last RSI value (absent until seeded)"), &["pair"]).unwrap()
});

// -------- Signals / risk / orders --------
pub static SIGNALS_BY: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("signals_total_by", "signal intents (labels: direction, pair)"),
        &["direction", "pair"],
    )
    .unwrap()
});

pub static RISK_REJECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("risk_rejections_total", "entries blocked by risk (labels: reason, pair)"),
        &["reason", "pair"],
    )
    .unwrap()
});

pub static ORDERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("order_outcomes_total", "terminal order outcomes"),
        &["status", "pair"],
    )
    .unwrap()
});

pub static ORDER_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("order_retries_total", "order re-submissions after transient errors"), &["pair"])
        .unwrap()
});

pub static EXECS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("exec_reports_total", "execution reports"),
        &["status", "venue"],
    )
    .unwrap()
});

// Latency from first submit -> terminal outcome (milliseconds)
pub static LAT_SUBMIT: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("order_submit_latency_ms", "Latency from first submit to terminal outcome (ms)")
            .buckets(vec![5.0, 25.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]),
    )
    .unwrap()
});

// -------- Position / PnL --------
pub static POSITION_QTY: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("position_qty", "open position quantity (0 = flat)"), &["pair"]).unwrap()
});

pub static PNL_REALIZED: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("pnl_realized", "realized PnL (quote currency)"), &["pair"]).unwrap()
});

pub static WIN_RATE: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("win_rate", "closed-trade win rate [0,1]"), &["pair"]).unwrap()
});

pub static DAILY_TRADES: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("daily_trade_count", "trades counted for the current UTC day"), &["pair"]).unwrap()
});

pub static DAILY_LOSS: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("daily_realized_loss", "realized loss for the current UTC day"), &["pair"]).unwrap()
});

pub static PAIR_HALTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("pair_halted", "1 if entries are halted for the pair"), &["pair"]).unwrap()
});

// -------- Binance kline stream health --------
pub static FEED_WS_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("binance_ws_connected", "1 if the kline WS is connected, 0 otherwise"),
        &["pair"],
    )
    .unwrap()
});

pub static FEED_WS_RECONNECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("binance_ws_reconnects_total", "Number of reconnects to the kline WS"),
        &["pair"],
    )
    .unwrap()
});

// ---- Config visibility (feed / venue / pairs) ----
pub static CONFIG_FEED_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_feed_mode", "feed mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub static CONFIG_VENUE_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_venue_mode", "venue mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub static CONFIG_PAIR: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_pair", "configured pairs (label: pair)"), &["pair"]).unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(SAMPLES.clone())),
        REGISTRY.register(Box::new(DATA_GAPS.clone())),
        REGISTRY.register(Box::new(RSI.clone())),
        REGISTRY.register(Box::new(SIGNALS_BY.clone())),
        REGISTRY.register(Box::new(RISK_REJECTS.clone())),
        REGISTRY.register(Box::new(ORDERS.clone())),
        REGISTRY.register(Box::new(ORDER_RETRIES.clone())),
        REGISTRY.register(Box::new(EXECS.clone())),
        REGISTRY.register(Box::new(LAT_SUBMIT.clone())),
        REGISTRY.register(Box::new(POSITION_QTY.clone())),
        REGISTRY.register(Box::new(PNL_REALIZED.clone())),
        REGISTRY.register(Box::new(WIN_RATE.clone())),
        REGISTRY.register(Box::new(DAILY_TRADES.clone())),
        REGISTRY.register(Box::new(DAILY_LOSS.clone())),
        REGISTRY.register(Box::new(PAIR_HALTED.clone())),
        // Binance WS health
        REGISTRY.register(Box::new(FEED_WS_CONNECTED.clone())),
        REGISTRY.register(Box::new(FEED_WS_RECONNECTS.clone())),
        // Config visibility
        REGISTRY.register(Box::new(CONFIG_FEED_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_VENUE_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_PAIR.clone())),
    ] {
        if let Err(e) = m {
            warn!(?e, "metric registration failed");
        }
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean).
// Bind failure only disables the exporter; trading keeps running.
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                error!(%addr, ?e, "metrics bind failed, exporter disabled");
                return;
            }
        };
        info!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => warn!(?e, "metrics accept error"),
            }
        }
    });
}
