// ===============================
// src/gateway.rs
// ===============================
//
// ExchangeGateway = kapabilitas venue yang dipakai ExecutionController.
// PaperGateway    = venue mock: fill penuh di reference_price setelah delay,
//                   dengan error transient acak (MOCK_FAIL_RATE) untuk uji retry.
//
use std::sync::Mutex;

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::domain::{OrderOutcome, OrderRequest, OrderStatus};
use crate::metrics::EXECS;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    /// Network, timeout, 5xx, rate limit: safe to retry with the same client id.
    #[error("transient venue error: {0}")]
    Transient(String),
    /// Venue refused the order; retrying will not help.
    #[error("order rejected: {0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool { matches!(self, GatewayError::Transient(_)) }
}

#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    fn venue(&self) -> &str;

    /// Submit one market order and wait for its terminal result.
    async fn submit(&self, req: &OrderRequest) -> Result<OrderOutcome, GatewayError>;

    /// Terminal outcome of a previously submitted order, `None` if the venue never saw it
    /// (or it is still working).
    async fn query_status(&self, pair: &str, client_order_id: &str) -> Result<Option<OrderOutcome>, GatewayError>;
}

pub struct PaperGateway {
    venue: String,
    fill_delay: Duration,
    fail_rate: f64,
    book: Mutex<HashMap<String, OrderOutcome>>,
}

impl PaperGateway {
    pub fn new(venue: impl Into<String>, fill_delay: Duration, fail_rate: f64) -> Self {
        Self { venue: venue.into(), fill_delay, fail_rate, book: Mutex::new(HashMap::new()) }
    }

    fn lookup(&self, client_order_id: &str) -> Option<OrderOutcome> {
        let book = self.book.lock().unwrap_or_else(|e| e.into_inner());
        book.get(client_order_id).cloned()
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    fn venue(&self) -> &str { &self.venue }

    async fn submit(&self, req: &OrderRequest) -> Result<OrderOutcome, GatewayError> {
        // client id yang sama -> hasil yang sama (dedup ala exchange)
        if let Some(prev) = self.lookup(&req.client_order_id) {
            debug!(cl_id = %req.client_order_id, "paper: duplicate submit, returning stored outcome");
            return Ok(prev);
        }

        sleep(self.fill_delay).await;

        // jangan simpan ThreadRng melewati .await
        let roll: f64 = rand::thread_rng().gen();
        if roll < self.fail_rate {
            EXECS.with_label_values(&["transient", &self.venue]).inc();
            warn!(cl_id = %req.client_order_id, "paper: simulated transient failure");
            return Err(GatewayError::Transient("simulated venue hiccup".into()));
        }
        if req.quantity <= rust_decimal::Decimal::ZERO {
            EXECS.with_label_values(&["rejected", &self.venue]).inc();
            return Err(GatewayError::Rejected("quantity must be positive".into()));
        }

        let outcome = OrderOutcome::filled(
            req,
            OrderStatus::Filled,
            req.reference_price,
            req.quantity,
            Some(format!("paper-{}", req.client_order_id)),
        );
        self.book
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(req.client_order_id.clone(), outcome.clone());
        EXECS.with_label_values(&["filled", &self.venue]).inc();
        Ok(outcome)
    }

    async fn query_status(&self, _pair: &str, client_order_id: &str) -> Result<Option<OrderOutcome>, GatewayError> {
        Ok(self.lookup(client_order_id))
    }
}
