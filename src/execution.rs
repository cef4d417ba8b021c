// ===============================
// src/execution.rs
// ===============================
//
// Order lifecycle per pair:
//
//   Pending -> Submitted{attempt} -> Filled | PartiallyFilled | Rejected | Failed
//
// - Tiap attempt dibatasi `submit_timeout`.
// - Error transient: backoff eksponensial, lalu query status sekali (client id
//   yang sama) sebelum submit ulang, supaya order yang ternyata sudah masuk
//   tidak terkirim dua kali.
// - Reject permanen: langsung terminal, tanpa retry.
// - Shutdown saat in-flight: berhenti menunggu, query status sekali.
//
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{info, warn};

use crate::domain::{OrderOutcome, OrderRequest, OrderStatus};
use crate::gateway::{ExchangeGateway, GatewayError};
use crate::metrics::{LAT_SUBMIT, ORDERS, ORDER_RETRIES};

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub submit_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            submit_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Wait before re-submitting after `failed_attempts` failures (1-based).
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let shift = failed_attempts.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << shift).min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderState {
    Idle,
    Pending,
    Submitted { attempt: u32 },
    Done(OrderStatus),
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{pair}: order {client_order_id} still in flight")]
    InFlight { pair: String, client_order_id: String },
    /// Shutdown arrived mid-order. `last_known` is whatever the venue reported afterwards.
    #[error("order {client_order_id} interrupted by shutdown")]
    Interrupted { client_order_id: String, last_known: Option<OrderOutcome> },
}

/// Resolves once the shutdown flag is set. Never resolves if the sender is gone.
pub async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

enum Step {
    Submitted(Result<Result<OrderOutcome, GatewayError>, tokio::time::error::Elapsed>),
    Shutdown,
}

enum Lookup {
    Landed(OrderOutcome),
    Missing,
    Shutdown,
}

pub struct ExecutionController {
    pair: String,
    gateway: Arc<dyn ExchangeGateway>,
    policy: RetryPolicy,
    state: OrderState,
    in_flight: Option<String>,
}

impl ExecutionController {
    pub fn new(pair: impl Into<String>, gateway: Arc<dyn ExchangeGateway>, policy: RetryPolicy) -> Self {
        Self { pair: pair.into(), gateway, policy, state: OrderState::Idle, in_flight: None }
    }

    pub fn state(&self) -> &OrderState { &self.state }
    pub fn in_flight(&self) -> Option<&str> { self.in_flight.as_deref() }

    /// Drive `req` to a terminal outcome. Rejected/Failed are returned as `Ok`.
    pub async fn execute(&mut self, req: OrderRequest, shutdown: &mut watch::Receiver<bool>) -> Result<OrderOutcome, ExecError> {
        if let Some(id) = &self.in_flight {
            return Err(ExecError::InFlight { pair: self.pair.clone(), client_order_id: id.clone() });
        }
        self.in_flight = Some(req.client_order_id.clone());
        self.state = OrderState::Pending;

        let gw = Arc::clone(&self.gateway);
        let started = Instant::now();
        let max = self.policy.max_attempts.max(1);
        let mut last_err = String::new();

        for attempt in 1..=max {
            if attempt > 1 {
                ORDER_RETRIES.with_label_values(&[&self.pair]).inc();
                let wait = self.policy.backoff(attempt - 1);
                tokio::select! {
                    _ = sleep(wait) => {}
                    _ = shutdown_signal(shutdown) => return Err(self.interrupted(&req).await),
                }
                match self.lookup(&req, shutdown).await {
                    Lookup::Landed(landed) => {
                        info!(pair = %self.pair, cl_id = %req.client_order_id, "order had landed, not re-submitting");
                        return Ok(self.finish(landed, attempt - 1, started));
                    }
                    Lookup::Missing => {}
                    Lookup::Shutdown => return Err(self.interrupted(&req).await),
                }
            }

            self.state = OrderState::Submitted { attempt };
            let step = tokio::select! {
                r = timeout(self.policy.submit_timeout, gw.submit(&req)) => Step::Submitted(r),
                _ = shutdown_signal(shutdown) => Step::Shutdown,
            };

            match step {
                Step::Shutdown => return Err(self.interrupted(&req).await),
                Step::Submitted(Ok(Ok(outcome))) => return Ok(self.finish(outcome, attempt, started)),
                Step::Submitted(Ok(Err(GatewayError::Rejected(msg)))) => {
                    warn!(pair = %self.pair, cl_id = %req.client_order_id, reason = %msg, "order rejected");
                    let outcome = OrderOutcome::unfilled(&req, OrderStatus::Rejected, msg);
                    return Ok(self.finish(outcome, attempt, started));
                }
                Step::Submitted(Ok(Err(GatewayError::Transient(msg)))) => {
                    warn!(pair = %self.pair, cl_id = %req.client_order_id, attempt, error = %msg, "transient submit error");
                    last_err = msg;
                }
                Step::Submitted(Err(_)) => {
                    warn!(pair = %self.pair, cl_id = %req.client_order_id, attempt, "submit timed out");
                    last_err = format!("submit timed out after {:?}", self.policy.submit_timeout);
                }
            }
        }

        // attempt terakhir bisa saja sudah masuk di venue
        match self.lookup(&req, shutdown).await {
            Lookup::Landed(landed) => {
                info!(pair = %self.pair, cl_id = %req.client_order_id, "last attempt had landed");
                return Ok(self.finish(landed, max, started));
            }
            Lookup::Missing => {}
            Lookup::Shutdown => return Err(self.interrupted(&req).await),
        }
        let outcome = OrderOutcome::unfilled(&req, OrderStatus::Failed, format!("gave up after {max} attempts: {last_err}"));
        Ok(self.finish(outcome, max, started))
    }

    /// Resolve an order left in flight by a cancelled `execute` call.
    pub async fn recover(&mut self) -> Result<Option<OrderOutcome>, GatewayError> {
        let Some(id) = self.in_flight.clone() else { return Ok(None) };
        let found = match timeout(self.policy.submit_timeout, self.gateway.query_status(&self.pair, &id)).await {
            Ok(r) => r?,
            Err(_) => return Err(GatewayError::Transient(format!("status query for {id} timed out"))),
        };
        self.in_flight = None;
        self.state = OrderState::Idle;
        Ok(found)
    }

    /// One bounded status query by client id. Errors and timeouts count as not found.
    async fn lookup(&self, req: &OrderRequest, shutdown: &mut watch::Receiver<bool>) -> Lookup {
        let query = timeout(self.policy.submit_timeout, self.gateway.query_status(&req.pair, &req.client_order_id));
        let found = tokio::select! {
            r = query => r,
            _ = shutdown_signal(shutdown) => return Lookup::Shutdown,
        };
        match found {
            Ok(Ok(Some(landed))) => Lookup::Landed(landed),
            Ok(Ok(None)) => Lookup::Missing,
            Ok(Err(e)) => {
                warn!(pair = %self.pair, cl_id = %req.client_order_id, %e, "status query failed");
                Lookup::Missing
            }
            Err(_) => {
                warn!(pair = %self.pair, cl_id = %req.client_order_id, "status query timed out");
                Lookup::Missing
            }
        }
    }

    fn finish(&mut self, mut outcome: OrderOutcome, attempts: u32, started: Instant) -> OrderOutcome {
        outcome.attempts = attempts.max(1);
        self.state = OrderState::Done(outcome.status);
        self.in_flight = None;
        ORDERS.with_label_values(&[outcome.status.as_str(), &self.pair]).inc();
        LAT_SUBMIT.observe(started.elapsed().as_secs_f64() * 1000.0);
        outcome
    }

    async fn interrupted(&mut self, req: &OrderRequest) -> ExecError {
        warn!(pair = %self.pair, cl_id = %req.client_order_id, "shutdown while order in flight, querying final status");
        let last_known = match timeout(self.policy.submit_timeout, self.gateway.query_status(&req.pair, &req.client_order_id)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!(pair = %self.pair, cl_id = %req.client_order_id, %e, "final status query failed");
                None
            }
            Err(_) => None,
        };
        self.in_flight = None;
        self.state = OrderState::Idle;
        ExecError::Interrupted { client_order_id: req.client_order_id.clone(), last_known }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderType, Side};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted venue: pops one response per submit; records submits/queries.
    #[derive(Default)]
    struct Script {
        replies: Mutex<VecDeque<Result<OrderOutcome, GatewayError>>>,
        landed: Mutex<Option<OrderOutcome>>,
        submit_delay: Duration,
        /// Submit number (1-based) after which the order shows up as filled.
        lands_on: u32,
        query_hangs: bool,
        submits: Mutex<u32>,
        queries: Mutex<u32>,
    }

    #[async_trait]
    impl ExchangeGateway for Script {
        fn venue(&self) -> &str { "script" }

        async fn submit(&self, _req: &OrderRequest) -> Result<OrderOutcome, GatewayError> {
            let n = {
                let mut submits = self.submits.lock().unwrap();
                *submits += 1;
                *submits
            };
            if n == self.lands_on {
                *self.landed.lock().unwrap() = Some(filled_at(dec!(102)));
            }
            sleep(self.submit_delay).await;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::Transient("script exhausted".into())))
        }

        async fn query_status(&self, _pair: &str, _id: &str) -> Result<Option<OrderOutcome>, GatewayError> {
            *self.queries.lock().unwrap() += 1;
            if self.query_hangs {
                std::future::pending::<()>().await;
            }
            Ok(self.landed.lock().unwrap().clone())
        }
    }

    fn req() -> OrderRequest {
        OrderRequest {
            client_order_id: "BTCUSDT-1-00000001".into(),
            pair: "BTCUSDT".into(),
            side: Side::Buy,
            quantity: dec!(0.5),
            order_type: OrderType::Market,
            reference_price: dec!(100),
            protection: None,
        }
    }

    fn filled_at(px: Decimal) -> OrderOutcome {
        OrderOutcome::filled(&req(), OrderStatus::Filled, px, dec!(0.5), Some("42".into()))
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            submit_timeout: Duration::from_secs(2),
        }
    }

    fn controller(script: Arc<Script>) -> ExecutionController {
        ExecutionController::new("BTCUSDT", script, policy())
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(10), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_twice_then_filled() {
        let script = Arc::new(Script::default());
        script.replies.lock().unwrap().extend([
            Err(GatewayError::Transient("502".into())),
            Err(GatewayError::Transient("429".into())),
            Ok(filled_at(dec!(101))),
        ]);
        let mut ctl = controller(script.clone());
        let (_tx, mut rx) = watch::channel(false);
        let out = ctl.execute(req(), &mut rx).await.unwrap();
        assert_eq!(out.status, OrderStatus::Filled);
        assert_eq!(out.fill_price, Some(dec!(101)));
        assert_eq!(out.attempts, 3);
        assert_eq!(*script.submits.lock().unwrap(), 3);
        // one status check before each re-submit
        assert_eq!(*script.queries.lock().unwrap(), 2);
        assert_eq!(ctl.state(), &OrderState::Done(OrderStatus::Filled));
        assert!(ctl.in_flight().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_reject_is_not_retried() {
        let script = Arc::new(Script::default());
        script.replies.lock().unwrap().push_back(Err(GatewayError::Rejected("-2010 insufficient balance".into())));
        let mut ctl = controller(script.clone());
        let (_tx, mut rx) = watch::channel(false);
        let out = ctl.execute(req(), &mut rx).await.unwrap();
        assert_eq!(out.status, OrderStatus::Rejected);
        assert_eq!(out.fill_price, None);
        assert_eq!(*script.submits.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail() {
        let script = Arc::new(Script::default());
        let mut ctl = controller(script.clone());
        let (_tx, mut rx) = watch::channel(false);
        let out = ctl.execute(req(), &mut rx).await.unwrap();
        assert_eq!(out.status, OrderStatus::Failed);
        assert_eq!(out.attempts, 3);
        assert_eq!(*script.submits.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_transient() {
        let script = Arc::new(Script { submit_delay: Duration::from_secs(5), ..Default::default() });
        script.replies.lock().unwrap().extend([Ok(filled_at(dec!(100))), Ok(filled_at(dec!(100))), Ok(filled_at(dec!(100)))]);
        let mut ctl = controller(script.clone());
        let (_tx, mut rx) = watch::channel(false);
        let out = ctl.execute(req(), &mut rx).await.unwrap();
        assert_eq!(out.status, OrderStatus::Failed);
        assert!(out.error.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_status_query_does_not_stall_retries() {
        let script = Arc::new(Script { query_hangs: true, ..Default::default() });
        let mut ctl = controller(script.clone());
        let (_tx, mut rx) = watch::channel(false);
        let out = timeout(Duration::from_secs(3600), ctl.execute(req(), &mut rx)).await.unwrap().unwrap();
        assert_eq!(out.status, OrderStatus::Failed);
        assert_eq!(*script.submits.lock().unwrap(), 3);
        // two before re-submits, one after the last attempt
        assert_eq!(*script.queries.lock().unwrap(), 3);
        assert!(ctl.in_flight().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_hung_status_query_interrupts() {
        let script = Arc::new(Script { query_hangs: true, ..Default::default() });
        let mut ctl = controller(script.clone());
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            // first backoff is 100ms, the status query starts right after
            sleep(Duration::from_millis(150)).await;
            let _ = tx.send(true);
        });
        let err = timeout(Duration::from_secs(3600), ctl.execute(req(), &mut rx)).await.unwrap().unwrap_err();
        assert!(matches!(err, ExecError::Interrupted { last_known: None, .. }));
        assert_eq!(*script.submits.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fill_landing_on_last_timed_out_attempt_is_kept() {
        let script = Arc::new(Script { submit_delay: Duration::from_secs(5), lands_on: 3, ..Default::default() });
        let mut ctl = controller(script.clone());
        let (_tx, mut rx) = watch::channel(false);
        let out = ctl.execute(req(), &mut rx).await.unwrap();
        assert_eq!(out.status, OrderStatus::Filled);
        assert_eq!(out.fill_price, Some(dec!(102)));
        assert_eq!(out.attempts, 3);
        assert_eq!(*script.submits.lock().unwrap(), 3);
        assert_eq!(ctl.state(), &OrderState::Done(OrderStatus::Filled));
    }

    #[tokio::test(start_paused = true)]
    async fn landed_order_is_not_resubmitted() {
        let script = Arc::new(Script::default());
        script.replies.lock().unwrap().push_back(Err(GatewayError::Transient("connection reset".into())));
        *script.landed.lock().unwrap() = Some(filled_at(dec!(99)));
        let mut ctl = controller(script.clone());
        let (_tx, mut rx) = watch::channel(false);
        let out = ctl.execute(req(), &mut rx).await.unwrap();
        assert_eq!(out.fill_price, Some(dec!(99)));
        assert_eq!(*script.submits.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_execute_leaves_marker_until_recovered() {
        let script = Arc::new(Script { submit_delay: Duration::from_secs(1), ..Default::default() });
        let mut ctl = controller(script.clone());
        let (_tx, mut rx) = watch::channel(false);
        let cut = timeout(Duration::from_millis(10), ctl.execute(req(), &mut rx)).await;
        assert!(cut.is_err());
        assert_eq!(ctl.in_flight(), Some("BTCUSDT-1-00000001"));

        let err = ctl.execute(req(), &mut rx).await.unwrap_err();
        assert!(matches!(err, ExecError::InFlight { .. }));

        *script.landed.lock().unwrap() = Some(filled_at(dec!(100)));
        let found = ctl.recover().await.unwrap();
        assert_eq!(found.map(|o| o.status), Some(OrderStatus::Filled));
        assert!(ctl.in_flight().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_mid_flight_queries_once() {
        let script = Arc::new(Script { submit_delay: Duration::from_secs(1), ..Default::default() });
        let mut ctl = controller(script.clone());
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
        });
        let err = ctl.execute(req(), &mut rx).await.unwrap_err();
        match err {
            ExecError::Interrupted { last_known, .. } => assert!(last_known.is_none()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(*script.queries.lock().unwrap(), 1);
        assert!(ctl.in_flight().is_none());
    }
}
