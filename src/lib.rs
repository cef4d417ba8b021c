// ===============================
// src/lib.rs
// ===============================
pub mod domain;
pub mod config;
pub mod metrics;
pub mod recorder;
pub mod feed;
pub mod indicators;
pub mod strategy;
pub mod risk;
pub mod positions;
pub mod execution;
pub mod gateway;          // trait + paper venue (fill at reference price after delay)
pub mod binance;          // helper (signer/types) for Binance
pub mod gateway_binance;  // real Binance Spot (signed REST MARKET orders)
pub mod posttrade;
pub mod engine;
