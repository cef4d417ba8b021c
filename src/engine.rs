// ===============================
// src/engine.rs
// ===============================
//
// Satu PairEngine per pair, dijalankan di task tokio sendiri. Satu siklus:
//
//   sample -> roll_day -> indikator -> sinyal -> risk -> order -> outcome
//
// berjalan berurutan; outcome selalu diterapkan ke PairContext sebelum
// sample berikutnya dievaluasi. Antar pair tidak ada state mutable bersama
// (gateway dibagi sebagai Arc immutable).
//
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::domain::{Direction, Event, OrderOutcome, OrderRequest, PriceSample, RiskBlock, SignalIntent};
use crate::execution::{shutdown_signal, ExecError, ExecutionController};
use crate::feed::{FeedError, MarketFeed};
use crate::gateway::ExchangeGateway;
use crate::indicators::{IndicatorEngine, IndicatorSnapshot};
use crate::metrics::{DATA_GAPS, RISK_REJECTS, RSI, SAMPLES, SIGNALS_BY};
use crate::posttrade;
use crate::risk::{OutcomeEffect, PairContext, RiskError, RiskManager};
use crate::strategy::SignalGenerator;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{pair} halted: {detail}")]
    Halted { pair: String, detail: String },
    #[error(transparent)]
    Risk(#[from] RiskError),
}

/// What happened during one sample. `snapshot == None` means the sample was skipped.
#[derive(Debug, Clone, Default)]
pub struct Cycle {
    pub snapshot: Option<IndicatorSnapshot>,
    pub intent: Option<SignalIntent>,
    pub request: Option<OrderRequest>,
    pub outcome: Option<OrderOutcome>,
    pub effect: Option<OutcomeEffect>,
    pub rejected: Option<RiskBlock>,
}

enum Step {
    Sample(Result<PriceSample, FeedError>),
    Perf,
    Shutdown,
}

pub struct PairEngine {
    pair: String,
    indicators: IndicatorEngine,
    signals: SignalGenerator,
    risk: RiskManager,
    ctx: PairContext,
    exec: ExecutionController,
    events: Option<mpsc::Sender<Event>>,
    perf_every: Duration,
    last_ts: Option<DateTime<Utc>>,
}

impl PairEngine {
    pub fn new(pair: impl Into<String>, settings: &Settings, gateway: Arc<dyn ExchangeGateway>) -> Self {
        let pair = pair.into();
        Self {
            indicators: IndicatorEngine::new(pair.clone(), settings.indicators),
            signals: SignalGenerator::new(settings.signals),
            risk: RiskManager::new(settings.limits.clone()),
            ctx: PairContext::new(pair.clone()),
            exec: ExecutionController::new(pair.clone(), gateway, settings.retry.clone()),
            events: None,
            perf_every: settings.args.perf_every,
            last_ts: None,
            pair,
        }
    }

    pub fn with_events(mut self, tx: mpsc::Sender<Event>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn pair(&self) -> &str { &self.pair }
    pub fn context(&self) -> &PairContext { &self.ctx }
    pub fn indicators(&self) -> IndicatorSnapshot { self.indicators.snapshot() }

    /// Consume samples until the feed closes or shutdown is signalled.
    pub async fn run<F: MarketFeed>(mut self, mut feed: F, mut shutdown: watch::Receiver<bool>) -> Result<PairContext, EngineError> {
        info!(pair = %self.pair, "pair engine started");
        let mut perf = interval(self.perf_every);
        perf.set_missed_tick_behavior(MissedTickBehavior::Delay);
        perf.tick().await;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let step = tokio::select! {
                r = feed.next_sample(&self.pair) => Step::Sample(r),
                _ = perf.tick() => Step::Perf,
                _ = shutdown_signal(&mut shutdown) => Step::Shutdown,
            };
            match step {
                Step::Sample(Ok(sample)) => {
                    self.on_sample(sample, &mut shutdown).await?;
                }
                Step::Sample(Err(FeedError::Unavailable(_, after))) => {
                    DATA_GAPS.with_label_values(&[&self.pair, "stale"]).inc();
                    warn!(pair = %self.pair, ?after, "no market data, skipping tick");
                }
                Step::Sample(Err(FeedError::Closed(_))) => {
                    info!(pair = %self.pair, "feed closed");
                    break;
                }
                Step::Perf => self.report_performance(Utc::now()),
                Step::Shutdown => break,
            }
        }

        self.report_performance(Utc::now());
        info!(pair = %self.pair, open = self.ctx.position().is_open, "pair engine stopped");
        Ok(self.ctx)
    }

    /// One full evaluation cycle for `sample`.
    pub async fn on_sample(&mut self, sample: PriceSample, shutdown: &mut watch::Receiver<bool>) -> Result<Cycle, EngineError> {
        let mut cycle = Cycle::default();

        let Some(close) = self.usable_close(&sample) else {
            return Ok(cycle);
        };
        self.last_ts = Some(sample.ts);
        SAMPLES.with_label_values(&[&self.pair]).inc();

        if self.risk.roll_day(&mut self.ctx, sample.ts) {
            info!(pair = %self.pair, day = %sample.ts.date_naive(), "daily risk counters reset");
        }

        if self.exec.in_flight().is_some() {
            self.recover_in_flight(sample.ts).await?;
        }

        let snap = self.indicators.update(close);
        if let Some(rsi) = snap.rsi {
            RSI.with_label_values(&[&self.pair]).set(rsi);
        }
        cycle.snapshot = Some(snap);

        let Some(intent) = self.signals.evaluate(&snap, &sample, &self.ctx, &self.risk) else {
            // setup valid tapi diblok risk -> catat sebagai rejection
            if !self.ctx.position().is_open && self.signals.entry_setup(&snap).is_some() {
                if let Some(block) = self.risk.entry_block(&self.ctx) {
                    self.reject(block, sample.ts);
                    cycle.rejected = Some(block);
                }
            }
            return Ok(cycle);
        };

        SIGNALS_BY.with_label_values(&[intent.direction.as_str(), &self.pair]).inc();
        info!(pair = %self.pair, direction = intent.direction.as_str(), reasons = ?intent.reasons, px = %intent.price, "signal");
        self.emit(Event::Signal(intent.clone()));
        cycle.intent = Some(intent.clone());

        let approved = match intent.direction {
            Direction::EnterLong => self.risk.approve_entry(&self.ctx, intent.price, intent.ts),
            Direction::ExitLong => self.risk.approve_exit(&self.ctx, intent.price, intent.ts),
        };
        let req = match approved {
            Ok(req) => req,
            Err(RiskError::Blocked(block)) => {
                self.reject(block, sample.ts);
                cycle.rejected = Some(block);
                return Ok(cycle);
            }
            Err(e) => return Err(e.into()),
        };
        cycle.request = Some(req.clone());

        let outcome = match self.exec.execute(req, shutdown).await {
            Ok(o) => o,
            Err(ExecError::Interrupted { client_order_id, last_known }) => {
                // jangan pernah mengasumsikan fill: hanya terapkan jika venue melaporkannya
                match last_known.filter(|o| o.status.is_fill()) {
                    Some(o) => o,
                    None => {
                        warn!(pair = %self.pair, cl_id = %client_order_id, "order outcome unknown at shutdown, nothing applied");
                        return Ok(cycle);
                    }
                }
            }
            Err(e @ ExecError::InFlight { .. }) => {
                warn!(pair = %self.pair, %e, "skipping order");
                return Ok(cycle);
            }
        };

        posttrade::log_outcome(&outcome);
        self.emit(Event::Order(outcome.clone()));
        cycle.effect = Some(self.apply_outcome(&outcome, sample.ts)?);
        cycle.outcome = Some(outcome);
        Ok(cycle)
    }

    /// Apply a terminal outcome to the pair's bookkeeping.
    pub fn apply_outcome(&mut self, outcome: &OrderOutcome, ts: DateTime<Utc>) -> Result<OutcomeEffect, EngineError> {
        let applied = self.risk.on_outcome(&mut self.ctx, outcome, ts);
        posttrade::publish(&self.ctx);
        match applied {
            Ok(effect) => {
                match &effect {
                    OutcomeEffect::Opened { entry_price, quantity } => {
                        let p = self.ctx.position();
                        info!(pair = %self.pair, entry = %entry_price, qty = %quantity, sl = %p.stop_loss, tp = %p.take_profit, "position opened");
                    }
                    OutcomeEffect::Reduced { pnl, remaining } => {
                        info!(pair = %self.pair, pnl = %pnl, remaining = %remaining, "position reduced");
                    }
                    OutcomeEffect::Closed { trade_pnl, .. } => {
                        info!(pair = %self.pair, pnl = %trade_pnl, trades_today = self.ctx.counters().trade_count, "position closed");
                    }
                    OutcomeEffect::Duplicate => debug!(pair = %self.pair, cl_id = %outcome.client_order_id, "outcome already applied"),
                    OutcomeEffect::Unchanged => {}
                }
                Ok(effect)
            }
            Err(RiskError::Invariant { pair, detail }) => {
                error!(%pair, %detail, "bookkeeping invariant violated");
                self.emit(Event::PairHalted { pair: pair.clone(), ts, reason: detail.clone() });
                Err(EngineError::Halted { pair, detail })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn usable_close(&self, sample: &PriceSample) -> Option<f64> {
        let gap = |kind: &str| DATA_GAPS.with_label_values(&[&self.pair, kind]).inc();
        if sample.pair != self.pair {
            warn!(pair = %self.pair, got = %sample.pair, "sample for another pair, skipped");
            gap("invalid");
            return None;
        }
        if self.last_ts.map(|t| sample.ts <= t).unwrap_or(false) {
            debug!(pair = %self.pair, ts = %sample.ts, "non-increasing timestamp, skipped");
            gap("out_of_order");
            return None;
        }
        match sample.close.to_f64() {
            Some(v) if v.is_finite() && sample.close > Decimal::ZERO => Some(v),
            _ => {
                warn!(pair = %self.pair, close = %sample.close, "unusable price, skipped");
                gap("invalid");
                None
            }
        }
    }

    async fn recover_in_flight(&mut self, ts: DateTime<Utc>) -> Result<(), EngineError> {
        match self.exec.recover().await {
            Ok(Some(outcome)) => {
                info!(pair = %self.pair, cl_id = %outcome.client_order_id, "recovered in-flight order");
                posttrade::log_outcome(&outcome);
                self.emit(Event::Order(outcome.clone()));
                self.apply_outcome(&outcome, ts)?;
            }
            Ok(None) => {}
            Err(e) => warn!(pair = %self.pair, %e, "in-flight order still unresolved"),
        }
        Ok(())
    }

    fn reject(&self, block: RiskBlock, ts: DateTime<Utc>) {
        RISK_REJECTS.with_label_values(&[block.as_str(), &self.pair]).inc();
        info!(pair = %self.pair, reason = block.as_str(), "entry blocked by risk");
        self.emit(Event::RiskRejected { pair: self.pair.clone(), ts, direction: Direction::EnterLong, block });
    }

    fn report_performance(&self, ts: DateTime<Utc>) {
        let snap = posttrade::snapshot(&self.ctx, ts);
        posttrade::publish(&self.ctx);
        posttrade::log_performance(&snap);
        self.emit(Event::Performance(snap));
    }

    fn emit(&self, ev: Event) {
        if let Some(tx) = &self.events {
            if tx.try_send(ev).is_err() {
                debug!(pair = %self.pair, "event sink full or closed, event dropped");
            }
        }
    }
}
