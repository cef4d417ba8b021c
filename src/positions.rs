// ===============================
// src/positions.rs (Position record & PnL tracker)
// ===============================
//
// Position hanya dimutasi lewat RiskManager (lihat risk.rs); modul ini
// menyediakan struktur data + aritmetika PnL-nya saja.
//
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Long-only position for one pair. Closed positions keep `quantity == 0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub is_open: bool,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub entry_time: Option<DateTime<Utc>>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// PnL already realized by partial exits of this position.
    pub realized_pnl: Decimal,
}

/// Result of shrinking a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reduction {
    pub pnl: Decimal,
    /// Whole-trade PnL, set once the position is fully closed.
    pub trade_pnl: Option<Decimal>,
}

impl Position {
    pub(crate) fn open(&mut self, entry_price: Decimal, quantity: Decimal, ts: DateTime<Utc>, sl_pct: Decimal, tp_pct: Decimal) {
        self.is_open = true;
        self.entry_price = entry_price;
        self.quantity = quantity;
        self.entry_time = Some(ts);
        self.stop_loss = entry_price * (Decimal::ONE - sl_pct);
        self.take_profit = entry_price * (Decimal::ONE + tp_pct);
        self.realized_pnl = Decimal::ZERO;
    }

    /// Reduce by `qty` at `exit_price`.
    pub(crate) fn reduce(&mut self, exit_price: Decimal, qty: Decimal) -> Reduction {
        let pnl = (exit_price - self.entry_price) * qty;
        self.quantity -= qty;
        self.realized_pnl += pnl;
        if self.quantity > Decimal::ZERO {
            return Reduction { pnl, trade_pnl: None };
        }
        let trade_pnl = self.realized_pnl;
        *self = Position::default();
        Reduction { pnl, trade_pnl: Some(trade_pnl) }
    }

    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        if !self.is_open {
            return Decimal::ZERO;
        }
        (mark - self.entry_price) * self.quantity
    }

    pub fn stop_hit(&self, price: Decimal) -> bool { self.is_open && price <= self.stop_loss }
    pub fn take_hit(&self, price: Decimal) -> bool { self.is_open && price >= self.take_profit }
}

/// Running win/loss tally for the performance snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub closed_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub realized_pnl: Decimal,
}

impl PerformanceStats {
    pub(crate) fn record_exit(&mut self, r: &Reduction) {
        self.realized_pnl += r.pnl;
        if let Some(trade_pnl) = r.trade_pnl {
            self.closed_trades += 1;
            if trade_pnl > Decimal::ZERO { self.wins += 1 } else { self.losses += 1 }
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.closed_trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.closed_trades as f64
    }
}
