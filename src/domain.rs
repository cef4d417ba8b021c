// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side { Buy, Sell }
impl Side {
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "BUY", Side::Sell => "SELL" } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType { Market }

/// One close-price observation for a pair. Immutable once built by a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample { pub pair: String, pub ts: DateTime<Utc>, pub close: Decimal }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction { EnterLong, ExitLong }
impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self { Direction::EnterLong => "enter_long", Direction::ExitLong => "exit_long" }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason { RsiOversold, RsiOverbought, EmaBullCross, EmaBearCross, StopLoss, TakeProfit }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalIntent {
    pub pair: String,
    pub direction: Direction,
    pub reasons: Vec<Reason>,
    pub price: Decimal,
    pub ts: DateTime<Utc>,
}

/// Stop/take levels planned at approval time for an entry order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Protection { pub stop_loss: Decimal, pub take_profit: Decimal }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub pair: String,
    pub side: Side,
    pub quantity: Decimal,
    pub order_type: OrderType,
    /// Price the decision was taken at; market orders may fill elsewhere.
    pub reference_price: Decimal,
    pub protection: Option<Protection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus { Filled, PartiallyFilled, Rejected, Failed }
impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Filled => "filled",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Failed => "failed",
        }
    }
    pub fn is_fill(&self) -> bool { matches!(self, OrderStatus::Filled | OrderStatus::PartiallyFilled) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub client_order_id: String,
    pub pair: String,
    pub side: Side,
    pub status: OrderStatus,
    pub fill_price: Option<Decimal>,
    pub filled_qty: Decimal,
    pub exchange_order_id: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl OrderOutcome {
    pub fn filled(req: &OrderRequest, status: OrderStatus, px: Decimal, qty: Decimal, exchange_order_id: Option<String>) -> Self {
        Self {
            client_order_id: req.client_order_id.clone(),
            pair: req.pair.clone(),
            side: req.side,
            status,
            fill_price: Some(px),
            filled_qty: qty,
            exchange_order_id,
            error: None,
            attempts: 1,
        }
    }

    /// Rejected/Failed outcome: carries no fill and never mutates a position.
    pub fn unfilled(req: &OrderRequest, status: OrderStatus, error: impl Into<String>) -> Self {
        Self {
            client_order_id: req.client_order_id.clone(),
            pair: req.pair.clone(),
            side: req.side,
            status,
            fill_price: None,
            filled_qty: Decimal::ZERO,
            exchange_order_id: None,
            error: Some(error.into()),
            attempts: 1,
        }
    }
}

/// Why an otherwise valid entry was not turned into an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBlock { PositionOpen, DailyTradeLimit, DailyLossLimit, Halted, SizeTooSmall }
impl RiskBlock {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBlock::PositionOpen => "position_open",
            RiskBlock::DailyTradeLimit => "daily_trade_limit",
            RiskBlock::DailyLossLimit => "daily_loss_limit",
            RiskBlock::Halted => "halted",
            RiskBlock::SizeTooSmall => "size_too_small",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub pair: String,
    pub ts: DateTime<Utc>,
    pub closed_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub realized_pnl: Decimal,
    pub position_open: bool,
}

/// Discrete records for the observability sink (JSONL recorder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Signal(SignalIntent),
    Order(OrderOutcome),
    RiskRejected { pair: String, ts: DateTime<Utc>, direction: Direction, block: RiskBlock },
    Performance(PerformanceSnapshot),
    PairHalted { pair: String, ts: DateTime<Utc>, reason: String },
}
