//! Property tests for indicator bounds and risk bookkeeping invariants.
//!
//! 1. RSI stays within [0, 100] for any close sequence
//! 2. EMA stays within the [min, max] of prices seen
//! 3. No enter-long intent while a position is open
//! 4. Daily trade counter never exceeds the limit; loss limit blocks entries
//! 5. Replaying an applied outcome changes nothing

mod common;

use chrono::Duration;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{at, fill, limits, PAIR};
use rsi_ema_bot::config::Sizing;
use rsi_ema_bot::domain::{Direction, OrderOutcome, OrderStatus, PriceSample, RiskBlock, Side};
use rsi_ema_bot::indicators::{Ema, IndicatorSnapshot, Rsi};
use rsi_ema_bot::risk::{OutcomeEffect, PairContext, RiskError, RiskManager};
use rsi_ema_bot::strategy::SignalGenerator;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_closes() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0..10_000.0_f64, 1..300)
}

#[derive(Debug, Clone)]
enum Op {
    Enter(u32),
    Exit(u32),
    Reject,
    NextDay,
    Replay,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (50u32..150).prop_map(Op::Enter),
        3 => (50u32..150).prop_map(Op::Exit),
        1 => Just(Op::Reject),
        1 => Just(Op::NextDay),
        2 => Just(Op::Replay),
    ]
}

// ── 1-2. Indicator bounds ────────────────────────────────────────────

proptest! {
    #[test]
    fn rsi_is_bounded(closes in arb_closes(), period in 1usize..30) {
        let mut rsi = Rsi::new(period);
        for c in closes {
            if let Some(v) = rsi.update(c) {
                prop_assert!((0.0..=100.0).contains(&v), "rsi {} out of range", v);
            }
        }
    }

    #[test]
    fn ema_stays_within_seen_range(closes in arb_closes(), period in 1usize..40) {
        let mut ema = Ema::new(period);
        let (mut lo, mut hi) = (f64::MAX, f64::MIN);
        for c in closes {
            lo = lo.min(c);
            hi = hi.max(c);
            if let Some(v) = ema.update(c) {
                let eps = hi * 1e-9;
                prop_assert!(v >= lo - eps && v <= hi + eps, "ema {} outside [{}, {}]", v, lo, hi);
            }
        }
    }
}

// ── 3. No entry while open ───────────────────────────────────────────

proptest! {
    #[test]
    fn no_enter_long_while_position_open(
        rsi in 0.0..100.0_f64,
        pf in 90.0..110.0_f64, ps in 90.0..110.0_f64,
        f in 90.0..110.0_f64, s in 90.0..110.0_f64,
        px in 80u32..130,
    ) {
        let risk = RiskManager::new(limits());
        let mut ctx = PairContext::new(PAIR);
        risk.on_outcome(&mut ctx, &fill("open", Side::Buy, dec!(100), dec!(1)), at(5, 0, 0)).unwrap();
        let snap = IndicatorSnapshot {
            rsi: Some(rsi), fast: Some(f), slow: Some(s), prev_fast: Some(pf), prev_slow: Some(ps), samples: 500,
        };
        let sample = PriceSample { pair: PAIR.into(), ts: at(5, 0, 1), close: Decimal::from(px) };
        if let Some(intent) = SignalGenerator::default().evaluate(&snap, &sample, &ctx, &risk) {
            prop_assert_eq!(intent.direction, Direction::ExitLong);
        }
        prop_assert_eq!(risk.entry_block(&ctx), Some(RiskBlock::PositionOpen));
    }
}

// ── 4-5. Risk bookkeeping over random event sequences ────────────────

proptest! {
    #[test]
    fn risk_invariants_hold(ops in prop::collection::vec(arb_op(), 1..120), max_trades in 2u32..8) {
        let mut l = limits();
        l.sizing = Sizing::FixedQuantity(dec!(1));
        l.max_daily_trades = max_trades;
        l.max_daily_loss = dec!(40);
        let risk = RiskManager::new(l);
        let mut ctx = PairContext::new(PAIR);
        let mut ts = at(5, 0, 0);
        let mut last: Option<OrderOutcome> = None;
        let mut n = 0u32;

        for op in ops {
            ts = ts + Duration::minutes(1);
            risk.roll_day(&mut ctx, ts);
            n += 1;
            match op {
                Op::Enter(px) => {
                    let px = Decimal::from(px);
                    match risk.approve_entry(&ctx, px, ts) {
                        Ok(req) => {
                            prop_assert!(!ctx.position().is_open);
                            let o = fill(&format!("in-{n}"), Side::Buy, px, req.quantity);
                            let eff = risk.on_outcome(&mut ctx, &o, ts).unwrap();
                            prop_assert!(matches!(eff, OutcomeEffect::Opened { .. }), "unexpected {:?}", eff);
                            last = Some(o);
                        }
                        Err(RiskError::Blocked(block)) => {
                            if ctx.position().is_open {
                                prop_assert_eq!(block, RiskBlock::PositionOpen);
                            }
                        }
                        Err(e) => prop_assert!(false, "unexpected error {}", e),
                    }
                }
                Op::Exit(px) => {
                    let px = Decimal::from(px);
                    if let Ok(req) = risk.approve_exit(&ctx, px, ts) {
                        let o = fill(&format!("out-{n}"), Side::Sell, px, req.quantity);
                        let eff = risk.on_outcome(&mut ctx, &o, ts).unwrap();
                        prop_assert!(matches!(eff, OutcomeEffect::Closed { .. }), "unexpected {:?}", eff);
                        last = Some(o);
                    }
                }
                Op::Reject => {
                    if let Ok(req) = risk.approve_entry(&ctx, dec!(100), ts) {
                        let o = OrderOutcome::unfilled(&req, OrderStatus::Rejected, "rejected");
                        prop_assert_eq!(risk.on_outcome(&mut ctx, &o, ts).unwrap(), OutcomeEffect::Unchanged);
                    }
                }
                Op::NextDay => ts = ts + Duration::days(1),
                Op::Replay => {
                    if let Some(o) = &last {
                        let (pos, counters, stats) = (ctx.position().clone(), ctx.counters().clone(), ctx.stats().clone());
                        prop_assert_eq!(risk.on_outcome(&mut ctx, o, ts).unwrap(), OutcomeEffect::Duplicate);
                        prop_assert_eq!(ctx.position(), &pos);
                        prop_assert_eq!(ctx.counters(), &counters);
                        prop_assert_eq!(ctx.stats(), &stats);
                    }
                }
            }

            prop_assert!(ctx.counters().trade_count <= max_trades);
            let p = ctx.position();
            if p.is_open {
                prop_assert!(p.quantity > Decimal::ZERO);
                prop_assert!(p.stop_loss < p.entry_price && p.entry_price < p.take_profit);
            } else {
                prop_assert_eq!(p.quantity, Decimal::ZERO);
            }
            if ctx.counters().realized_loss >= dec!(40) {
                prop_assert!(!risk.may_enter(&ctx));
            }
            prop_assert!(ctx.halt_reason().is_none());
        }
    }
}
