// ===============================
// src/binance.rs
// ===============================
//
// Helper Binance Spot: signing + model REST/WS yang dipakai gateway & feed.
//
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::domain::{OrderOutcome, OrderRequest, OrderStatus, PriceSample};

pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Hex HMAC-SHA256 of the query string, as Binance expects in `signature`.
pub fn sign_query(secret: &str, query: &str) -> String {
    // HMAC menerima key dengan panjang berapa pun, jadi error di sini tidak mungkin
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(query.as_bytes());
    let sig = mac.finalize().into_bytes();
    hex::encode(sig)
}

/// `k=v&k=v` with values url-encoded, in the given order.
pub fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

// ---- REST models ----

#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Deserialize)]
pub struct Fill {
    pub price: String,
    pub qty: String,
}

/// `POST /api/v3/order` (newOrderRespType=FULL) and `GET /api/v3/order`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: u64,
    pub client_order_id: String,
    pub status: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub executed_qty: String,
    #[serde(default)]
    pub cummulative_quote_qty: String,
    #[serde(default)]
    pub fills: Vec<Fill>,
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or(Decimal::ZERO)
}

impl OrderResponse {
    pub fn executed(&self) -> Decimal { dec(&self.executed_qty) }

    /// Quantity-weighted fill price: from `fills` if present, else quote/qty.
    pub fn avg_price(&self) -> Option<Decimal> {
        let (mut notional, mut qty) = (Decimal::ZERO, Decimal::ZERO);
        for f in &self.fills {
            let q = dec(&f.qty);
            notional += dec(&f.price) * q;
            qty += q;
        }
        if qty > Decimal::ZERO {
            return Some(notional / qty);
        }
        let executed = self.executed();
        let quote = dec(&self.cummulative_quote_qty);
        if executed > Decimal::ZERO && quote > Decimal::ZERO {
            return Some(quote / executed);
        }
        None
    }

    /// Map to a terminal outcome; `None` while the order is still working (NEW).
    pub fn to_outcome(&self, req_like: &OrderRequest) -> Option<OrderOutcome> {
        let executed = self.executed();
        let exchange_id = Some(self.order_id.to_string());
        let outcome = match self.status.as_str() {
            "FILLED" => {
                let px = self.avg_price()?;
                OrderOutcome::filled(req_like, OrderStatus::Filled, px, executed, exchange_id)
            }
            // MARKET yang sebagian terisi lalu kadaluarsa tetap dihitung partial fill
            "PARTIALLY_FILLED" | "EXPIRED" | "CANCELED" | "EXPIRED_IN_MATCH" if executed > Decimal::ZERO => {
                let px = self.avg_price()?;
                OrderOutcome::filled(req_like, OrderStatus::PartiallyFilled, px, executed, exchange_id)
            }
            "REJECTED" | "EXPIRED" | "CANCELED" | "EXPIRED_IN_MATCH" => {
                let mut o = OrderOutcome::unfilled(req_like, OrderStatus::Rejected, format!("order {}", self.status));
                o.exchange_order_id = exchange_id;
                o
            }
            _ => return None,
        };
        Some(outcome)
    }
}

// ---- Kline stream models ----
// Contoh payload:
// {"e":"kline","E":1672515782136,"s":"BNBBTC","k":{"t":1672515780000,"T":1672515839999,
//  "s":"BNBBTC","i":"1m","o":"0.0010","c":"0.0020","h":"0.0025","l":"0.0015","v":"1000","x":false}}

#[derive(Debug, Deserialize)]
pub struct KlineEnvelope {
    #[serde(rename = "e", default)]
    pub event: Option<String>,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: Kline,
}

#[derive(Debug, Deserialize)]
pub struct Kline {
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "x")]
    pub closed: bool,
}

impl KlineEnvelope {
    /// Closed kline -> sample stamped with the kline close time. Open klines give `None`.
    pub fn to_sample(&self, pair: &str) -> Option<PriceSample> {
        if !self.kline.closed {
            return None;
        }
        let close = Decimal::from_str(&self.kline.close).ok()?;
        let ts: DateTime<Utc> = Utc.timestamp_millis_opt(self.kline.close_time).single()?;
        Some(PriceSample { pair: pair.to_string(), ts, close })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderType, Side};
    use rust_decimal_macros::dec;

    #[test]
    fn signature_matches_binance_doc_example() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_query(secret, query),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    fn req() -> OrderRequest {
        OrderRequest {
            client_order_id: "c1".into(),
            pair: "BTCUSDT".into(),
            side: Side::Sell,
            quantity: dec!(0.3),
            order_type: OrderType::Market,
            reference_price: dec!(100),
            protection: None,
        }
    }

    #[test]
    fn full_response_uses_weighted_fill_price() {
        let body = r#"{"symbol":"BTCUSDT","orderId":28,"clientOrderId":"c1","status":"FILLED",
            "executedQty":"0.30000000","cummulativeQuoteQty":"30.20000000",
            "fills":[{"price":"100.00","qty":"0.10","commission":"0","commissionAsset":"USDT"},
                     {"price":"101.00","qty":"0.20","commission":"0","commissionAsset":"USDT"}]}"#;
        let r: OrderResponse = serde_json::from_str(body).unwrap();
        let o = r.to_outcome(&req()).unwrap();
        assert_eq!(o.status, OrderStatus::Filled);
        let px = o.fill_price.unwrap();
        assert!(px > dec!(100.666) && px < dec!(100.667), "{px}");
        assert_eq!(o.filled_qty, dec!(0.3));
        assert_eq!(o.exchange_order_id.as_deref(), Some("28"));
    }

    #[test]
    fn expired_market_with_some_qty_is_partial() {
        let body = r#"{"symbol":"BTCUSDT","orderId":29,"clientOrderId":"c1","status":"EXPIRED",
            "executedQty":"0.1","cummulativeQuoteQty":"10.5"}"#;
        let r: OrderResponse = serde_json::from_str(body).unwrap();
        let o = r.to_outcome(&req()).unwrap();
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert_eq!(o.fill_price, Some(dec!(105)));

        let new: OrderResponse = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","orderId":30,"clientOrderId":"c1","status":"NEW","executedQty":"0"}"#,
        )
        .unwrap();
        assert!(new.to_outcome(&req()).is_none());
    }

    #[test]
    fn only_closed_klines_become_samples() {
        let open = r#"{"e":"kline","E":1,"s":"BTCUSDT","k":{"t":0,"T":1700000059999,"s":"BTCUSDT","i":"1m","c":"37000.5","x":false}}"#;
        let env: KlineEnvelope = serde_json::from_str(open).unwrap();
        assert!(env.to_sample("BTCUSDT").is_none());

        let closed = open.replace("\"x\":false", "\"x\":true");
        let env: KlineEnvelope = serde_json::from_str(&closed).unwrap();
        let s = env.to_sample("BTCUSDT").unwrap();
        assert_eq!(s.close, dec!(37000.5));
        assert_eq!(s.ts.timestamp_millis(), 1700000059999);
    }
}
