// ===============================
// src/gateway_binance.rs
// ===============================
//
// Binance Spot gateway (REST, signed).
// - submit      : MARKET order, newOrderRespType=FULL -> fill price dari `fills`.
// - query_status: GET /api/v3/order?origClientOrderId=..., -2013 = order tidak dikenal.
//
// Klasifikasi error:
//   Transient : network/timeout, HTTP 429/418/5xx, code -1007 (timeout backend)
//   Rejected  : 4xx lainnya (saldo kurang, filter LOT_SIZE, dsb)
//
use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::binance::{encode_params, sign_query, timestamp_ms, ApiError, OrderResponse};
use crate::domain::{OrderOutcome, OrderRequest, OrderType, Side};
use crate::gateway::{ExchangeGateway, GatewayError};
use crate::metrics::EXECS;

const ORDER_PATH: &str = "/api/v3/order";
const UNKNOWN_ORDER: i64 = -2013;
const BACKEND_TIMEOUT: i64 = -1007;

pub struct BinanceGateway {
    http: reqwest::Client,
    rest_base: String,
    api_key: String,
    api_secret: String,
    recv_window: u64,
    venue: String,
}

impl BinanceGateway {
    pub fn new(rest_base: impl Into<String>, api_key: impl Into<String>, api_secret: impl Into<String>, recv_window: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(http, rest_base, api_key, api_secret, recv_window)
    }

    pub fn with_client(
        http: reqwest::Client,
        rest_base: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        recv_window: u64,
    ) -> Self {
        Self {
            http,
            rest_base: rest_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            recv_window,
            venue: "binance".into(),
        }
    }

    fn signed_url(&self, mut params: Vec<(&str, String)>) -> String {
        params.push(("recvWindow", self.recv_window.to_string()));
        params.push(("timestamp", timestamp_ms().to_string()));
        let query = encode_params(&params);
        let sig = sign_query(&self.api_secret, &query);
        format!("{}{}?{}&signature={}", self.rest_base, ORDER_PATH, query, sig)
    }

    fn mark(&self, status: &str) {
        EXECS.with_label_values(&[status, &self.venue]).inc();
    }
}

/// Map a non-2xx reply to transient vs permanent.
fn classify(status: StatusCode, body: &str) -> GatewayError {
    let api: Option<ApiError> = serde_json::from_str(body).ok();
    let detail = match &api {
        Some(e) => format!("{} {}: {}", status.as_u16(), e.code, e.msg),
        None => format!("{} {}", status.as_u16(), body),
    };
    let transient = status == StatusCode::TOO_MANY_REQUESTS
        || status.as_u16() == 418
        || status.is_server_error()
        || api.as_ref().map(|e| e.code == BACKEND_TIMEOUT).unwrap_or(false);
    if transient { GatewayError::Transient(detail) } else { GatewayError::Rejected(detail) }
}

#[async_trait]
impl ExchangeGateway for BinanceGateway {
    fn venue(&self) -> &str { &self.venue }

    async fn submit(&self, req: &OrderRequest) -> Result<OrderOutcome, GatewayError> {
        let side = match req.side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let order_type = match req.order_type {
            OrderType::Market => "MARKET",
        };
        let url = self.signed_url(vec![
            ("symbol", req.pair.to_ascii_uppercase()),
            ("side", side.to_string()),
            ("type", order_type.to_string()),
            ("quantity", req.quantity.normalize().to_string()),
            ("newClientOrderId", req.client_order_id.clone()),
            ("newOrderRespType", "FULL".to_string()),
        ]);

        let rsp = self
            .http
            .post(url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                self.mark("transient");
                GatewayError::Transient(format!("order send err: {e}"))
            })?;

        let code = rsp.status();
        let body = rsp.text().await.map_err(|e| GatewayError::Transient(format!("read body: {e}")))?;
        if !code.is_success() {
            let err = classify(code, &body);
            self.mark(if err.is_transient() { "transient" } else { "rejected" });
            warn!(cl_id = %req.client_order_id, %code, %body, "order send failed");
            return Err(err);
        }

        let parsed: OrderResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Transient(format!("bad order response: {e}")))?;
        match parsed.to_outcome(req) {
            Some(outcome) => {
                self.mark(outcome.status.as_str());
                info!(cl_id = %req.client_order_id, status = %parsed.status, qty = %outcome.filled_qty, "order sent OK");
                Ok(outcome)
            }
            // MARKET masih NEW: anggap transient, controller akan query status sebelum kirim ulang
            None => Err(GatewayError::Transient(format!("order {} still {}", req.client_order_id, parsed.status))),
        }
    }

    async fn query_status(&self, pair: &str, client_order_id: &str) -> Result<Option<OrderOutcome>, GatewayError> {
        let url = self.signed_url(vec![
            ("symbol", pair.to_ascii_uppercase()),
            ("origClientOrderId", client_order_id.to_string()),
        ]);
        let rsp = self
            .http
            .get(url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(format!("status query err: {e}")))?;

        let code = rsp.status();
        let body = rsp.text().await.map_err(|e| GatewayError::Transient(format!("read body: {e}")))?;
        if !code.is_success() {
            if let Ok(api) = serde_json::from_str::<ApiError>(&body) {
                if api.code == UNKNOWN_ORDER {
                    return Ok(None);
                }
            }
            return Err(classify(code, &body));
        }

        let parsed: OrderResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Transient(format!("bad status response: {e}")))?;
        if parsed.client_order_id != client_order_id {
            warn!(cl_id = %client_order_id, got = %parsed.client_order_id, "status reply for another order");
            return Ok(None);
        }
        let side = match parsed.side.as_str() {
            "SELL" => Side::Sell,
            _ => Side::Buy,
        };
        Ok(parsed.to_outcome(&OrderRequest {
            client_order_id: client_order_id.to_string(),
            pair: pair.to_string(),
            side,
            quantity: parsed.executed(),
            order_type: OrderType::Market,
            reference_price: Default::default(),
            protection: None,
        }))
    }
}
