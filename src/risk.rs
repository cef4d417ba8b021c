// ===============================
// src/risk.rs
// ===============================
//
// RiskManager = kebijakan (limits + sizing), PairContext = state otoritatif
// per pair (posisi, counter harian, statistik). Context dimiliki oleh loop
// pair dan hanya diubah lewat method `&mut` di sini, jadi mutasi untuk satu
// pair otomatis terserialisasi.
//
use ahash::AHashSet;
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;
use tracing::error;

use crate::config::{Limits, Sizing};
use crate::domain::{OrderOutcome, OrderRequest, OrderType, Protection, RiskBlock, Side};
use crate::positions::{PerformanceStats, Position, Reduction};

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("entry blocked: {}", .0.as_str())]
    Blocked(RiskBlock),
    #[error("no open position to exit")]
    NoPosition,
    #[error("invariant violated for {pair}: {detail}")]
    Invariant { pair: String, detail: String },
}

/// Per-UTC-day counters. `day == None` until the first event is seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyRiskCounters {
    pub day: Option<NaiveDate>,
    pub trade_count: u32,
    pub realized_loss: Decimal,
}

/// Everything the risk side knows about one pair's trading session.
#[derive(Debug, Clone)]
pub struct PairContext {
    pair: String,
    position: Position,
    counters: DailyRiskCounters,
    stats: PerformanceStats,
    /// Client ids of every fill applied this session.
    applied: AHashSet<String>,
    halted: Option<String>,
}

impl PairContext {
    pub fn new(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            position: Position::default(),
            counters: DailyRiskCounters::default(),
            stats: PerformanceStats::default(),
            applied: AHashSet::new(),
            halted: None,
        }
    }

    pub fn pair(&self) -> &str { &self.pair }
    pub fn position(&self) -> &Position { &self.position }
    pub fn counters(&self) -> &DailyRiskCounters { &self.counters }
    pub fn stats(&self) -> &PerformanceStats { &self.stats }
    pub fn halt_reason(&self) -> Option<&str> { self.halted.as_deref() }

    fn already_applied(&self, client_order_id: &str) -> bool {
        self.applied.contains(client_order_id)
    }
}

/// What a single outcome did to the context.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeEffect {
    Opened { entry_price: Decimal, quantity: Decimal },
    Reduced { pnl: Decimal, remaining: Decimal },
    Closed { pnl: Decimal, trade_pnl: Decimal },
    /// Rejected/failed or empty fill: nothing changed.
    Unchanged,
    /// Outcome id was applied before.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: Limits,
}

impl RiskManager {
    pub fn new(limits: Limits) -> Self { Self { limits } }

    pub fn limits(&self) -> &Limits { &self.limits }

    /// Reset counters when `ts` falls on a later UTC date. Returns true on reset.
    pub fn roll_day(&self, ctx: &mut PairContext, ts: DateTime<Utc>) -> bool {
        let today = ts.date_naive();
        match ctx.counters.day {
            Some(day) if day >= today => false,
            Some(_) => {
                ctx.counters = DailyRiskCounters { day: Some(today), ..Default::default() };
                true
            }
            None => {
                ctx.counters.day = Some(today);
                false
            }
        }
    }

    /// First reason an entry is not allowed right now, if any.
    ///
    /// The trade limit reserves room for the closing exit: an entry is blocked once
    /// `trade_count + 2 > max_daily_trades`, i.e. already at `max - 1`.
    pub fn entry_block(&self, ctx: &PairContext) -> Option<RiskBlock> {
        if ctx.halted.is_some() {
            return Some(RiskBlock::Halted);
        }
        if ctx.position.is_open {
            return Some(RiskBlock::PositionOpen);
        }
        // entry hanya boleh kalau masih ada ruang untuk exit-nya juga
        if ctx.counters.trade_count.saturating_add(2) > self.limits.max_daily_trades {
            return Some(RiskBlock::DailyTradeLimit);
        }
        if ctx.counters.realized_loss >= self.limits.max_daily_loss {
            return Some(RiskBlock::DailyLossLimit);
        }
        None
    }

    pub fn may_enter(&self, ctx: &PairContext) -> bool { self.entry_block(ctx).is_none() }

    /// Size an entry at `price`. Does not touch the position.
    pub fn approve_entry(&self, ctx: &PairContext, price: Decimal, ts: DateTime<Utc>) -> Result<OrderRequest, RiskError> {
        if let Some(block) = self.entry_block(ctx) {
            return Err(RiskError::Blocked(block));
        }
        let raw = match self.limits.sizing {
            Sizing::FixedFraction(f) if price > Decimal::ZERO => self.limits.capital * f / price,
            Sizing::FixedFraction(_) => Decimal::ZERO,
            Sizing::FixedQuantity(q) => q,
        };
        let quantity = raw.round_dp_with_strategy(self.limits.qty_decimals, RoundingStrategy::ToZero);
        if quantity <= Decimal::ZERO {
            return Err(RiskError::Blocked(RiskBlock::SizeTooSmall));
        }
        Ok(OrderRequest {
            client_order_id: client_order_id(&ctx.pair, ts),
            pair: ctx.pair.clone(),
            side: Side::Buy,
            quantity,
            order_type: OrderType::Market,
            reference_price: price,
            protection: Some(Protection {
                stop_loss: price * (Decimal::ONE - self.limits.stop_loss_pct),
                take_profit: price * (Decimal::ONE + self.limits.take_profit_pct),
            }),
        })
    }

    /// Exit order for the whole open quantity.
    pub fn approve_exit(&self, ctx: &PairContext, price: Decimal, ts: DateTime<Utc>) -> Result<OrderRequest, RiskError> {
        if !ctx.position.is_open {
            return Err(RiskError::NoPosition);
        }
        Ok(OrderRequest {
            client_order_id: client_order_id(&ctx.pair, ts),
            pair: ctx.pair.clone(),
            side: Side::Sell,
            quantity: ctx.position.quantity,
            order_type: OrderType::Market,
            reference_price: price,
            protection: None,
        })
    }

    /// Apply one terminal order outcome. A fill is applied at most once per client
    /// order id for the lifetime of the context.
    pub fn on_outcome(&self, ctx: &mut PairContext, outcome: &OrderOutcome, ts: DateTime<Utc>) -> Result<OutcomeEffect, RiskError> {
        self.roll_day(ctx, ts);
        // non-fill tidak mengubah apa pun, jadi tidak perlu diingat
        if !outcome.status.is_fill() || outcome.filled_qty <= Decimal::ZERO {
            return Ok(OutcomeEffect::Unchanged);
        }
        if ctx.already_applied(&outcome.client_order_id) {
            return Ok(OutcomeEffect::Duplicate);
        }
        ctx.applied.insert(outcome.client_order_id.clone());
        let Some(px) = outcome.fill_price.filter(|p| *p > Decimal::ZERO) else {
            return Err(self.violation(ctx, format!("fill {} without a usable price", outcome.client_order_id)));
        };

        match outcome.side {
            Side::Buy => {
                if ctx.position.is_open {
                    return Err(self.violation(ctx, format!("entry fill {} while a position is open", outcome.client_order_id)));
                }
                ctx.position.open(px, outcome.filled_qty, ts, self.limits.stop_loss_pct, self.limits.take_profit_pct);
                ctx.counters.trade_count += 1;
                Ok(OutcomeEffect::Opened { entry_price: px, quantity: outcome.filled_qty })
            }
            Side::Sell => {
                if !ctx.position.is_open {
                    return Err(self.violation(ctx, format!("exit fill {} without an open position", outcome.client_order_id)));
                }
                if outcome.filled_qty > ctx.position.quantity {
                    let detail = format!(
                        "exit fill {} for {} exceeds position {}",
                        outcome.client_order_id, outcome.filled_qty, ctx.position.quantity
                    );
                    return Err(self.violation(ctx, detail));
                }
                let r: Reduction = ctx.position.reduce(px, outcome.filled_qty);
                if r.pnl < Decimal::ZERO {
                    ctx.counters.realized_loss += -r.pnl;
                }
                ctx.stats.record_exit(&r);
                match r.trade_pnl {
                    Some(trade_pnl) => {
                        ctx.counters.trade_count += 1;
                        Ok(OutcomeEffect::Closed { pnl: r.pnl, trade_pnl })
                    }
                    None => Ok(OutcomeEffect::Reduced { pnl: r.pnl, remaining: ctx.position.quantity }),
                }
            }
        }
    }

    /// Stop new entries for the pair until an operator restarts it.
    pub fn halt(&self, ctx: &mut PairContext, reason: impl Into<String>) {
        let reason = reason.into();
        error!(pair = %ctx.pair, %reason, "pair halted");
        ctx.halted = Some(reason);
    }

    fn violation(&self, ctx: &mut PairContext, detail: String) -> RiskError {
        self.halt(ctx, detail.clone());
        RiskError::Invariant { pair: ctx.pair.clone(), detail }
    }
}

/// Unique, Binance-compatible (<= 36 chars) client order id.
fn client_order_id(pair: &str, ts: DateTime<Utc>) -> String {
    let mut id = format!("{}-{}-{:08x}", pair, ts.timestamp_millis(), rand::thread_rng().gen::<u32>());
    id.truncate(36);
    id
}
