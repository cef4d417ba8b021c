// ===============================
// src/strategy.rs
// ===============================
//
// RSI + EMA crossover (long only).
//
//   Enter : RSI < oversold  DAN golden cross (fast EMA tembus ke atas slow EMA)
//           pada sample ini, tanpa posisi terbuka, dan risk mengizinkan entry.
//   Exit  : posisi terbuka DAN salah satu:
//             - harga <= stop-loss
//             - harga >= take-profit
//             - RSI > overbought DAN death cross pada sample ini
//
// Generator tidak menyimpan state: hanya membaca snapshot indikator,
// posisi (read-only) dan izin dari RiskManager.
//
use crate::domain::{Direction, PriceSample, Reason, SignalIntent};
use crate::indicators::IndicatorSnapshot;
use crate::positions::Position;
use crate::risk::{PairContext, RiskManager};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalParams {
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for SignalParams {
    fn default() -> Self { Self { oversold: 30.0, overbought: 70.0 } }
}

#[derive(Debug, Clone, Default)]
pub struct SignalGenerator {
    params: SignalParams,
}

impl SignalGenerator {
    pub fn new(params: SignalParams) -> Self { Self { params } }

    /// Raw indicator setup for an entry, ignoring position and risk state.
    pub fn entry_setup(&self, snap: &IndicatorSnapshot) -> Option<Vec<Reason>> {
        if !snap.is_ready() {
            return None;
        }
        let rsi = snap.rsi?;
        if rsi < self.params.oversold && snap.golden_cross() {
            return Some(vec![Reason::RsiOversold, Reason::EmaBullCross]);
        }
        None
    }

    /// Exit reasons for an open position; stop/take do not need warm-up.
    pub fn exit_setup(&self, snap: &IndicatorSnapshot, price: &PriceSample, pos: &Position) -> Option<Vec<Reason>> {
        if !pos.is_open {
            return None;
        }
        if pos.stop_hit(price.close) {
            return Some(vec![Reason::StopLoss]);
        }
        if pos.take_hit(price.close) {
            return Some(vec![Reason::TakeProfit]);
        }
        match snap.rsi {
            Some(rsi) if snap.is_ready() && rsi > self.params.overbought && snap.death_cross() => {
                Some(vec![Reason::RsiOverbought, Reason::EmaBearCross])
            }
            _ => None,
        }
    }

    pub fn evaluate(
        &self,
        snap: &IndicatorSnapshot,
        sample: &PriceSample,
        ctx: &PairContext,
        risk: &RiskManager,
    ) -> Option<SignalIntent> {
        let pos = ctx.position();
        let (direction, reasons) = if pos.is_open {
            (Direction::ExitLong, self.exit_setup(snap, sample, pos)?)
        } else {
            let reasons = self.entry_setup(snap)?;
            if !risk.may_enter(ctx) {
                return None;
            }
            (Direction::EnterLong, reasons)
        };
        Some(SignalIntent {
            pair: sample.pair.clone(),
            direction,
            reasons,
            price: sample.close,
            ts: sample.ts,
        })
    }
}
