// ===============================
// src/posttrade.rs
// ===============================
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use tracing::{info, warn};

use crate::domain::{OrderOutcome, OrderStatus, PerformanceSnapshot};
use crate::metrics::{DAILY_LOSS, DAILY_TRADES, PAIR_HALTED, PNL_REALIZED, POSITION_QTY, WIN_RATE};
use crate::risk::PairContext;

pub fn log_outcome(o: &OrderOutcome) {
    match o.status {
        OrderStatus::Filled => info!(pair = %o.pair, cl_id = %o.client_order_id, side = o.side.as_str(), qty = %o.filled_qty, px = ?o.fill_price, attempts = o.attempts, "FILLED"),
        OrderStatus::PartiallyFilled => info!(pair = %o.pair, cl_id = %o.client_order_id, side = o.side.as_str(), qty = %o.filled_qty, px = ?o.fill_price, attempts = o.attempts, "PARTIAL"),
        OrderStatus::Rejected => warn!(pair = %o.pair, cl_id = %o.client_order_id, reason = ?o.error, "REJECT"),
        OrderStatus::Failed => warn!(pair = %o.pair, cl_id = %o.client_order_id, attempts = o.attempts, reason = ?o.error, "FAILED (opportunity dropped)"),
    }
}

pub fn snapshot(ctx: &PairContext, ts: DateTime<Utc>) -> PerformanceSnapshot {
    let stats = ctx.stats();
    PerformanceSnapshot {
        pair: ctx.pair().to_string(),
        ts,
        closed_trades: stats.closed_trades,
        wins: stats.wins,
        losses: stats.losses,
        win_rate: stats.win_rate(),
        realized_pnl: stats.realized_pnl,
        position_open: ctx.position().is_open,
    }
}

/// Push the pair's bookkeeping into the gauges.
pub fn publish(ctx: &PairContext) {
    let pair = ctx.pair();
    let stats = ctx.stats();
    POSITION_QTY.with_label_values(&[pair]).set(ctx.position().quantity.to_f64().unwrap_or(0.0));
    PNL_REALIZED.with_label_values(&[pair]).set(stats.realized_pnl.to_f64().unwrap_or(0.0));
    WIN_RATE.with_label_values(&[pair]).set(stats.win_rate());
    DAILY_TRADES.with_label_values(&[pair]).set(ctx.counters().trade_count as i64);
    DAILY_LOSS.with_label_values(&[pair]).set(ctx.counters().realized_loss.to_f64().unwrap_or(0.0));
    PAIR_HALTED.with_label_values(&[pair]).set(ctx.halt_reason().is_some() as i64);
}

pub fn log_performance(s: &PerformanceSnapshot) {
    info!(
        pair = %s.pair,
        closed = s.closed_trades,
        wins = s.wins,
        losses = s.losses,
        win_rate = %format!("{:.1}%", s.win_rate * 100.0),
        pnl = %s.realized_pnl,
        open = s.position_open,
        "performance"
    );
}
