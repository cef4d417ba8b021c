// ===============================
// src/indicators.rs
// ===============================
//
// Incremental RSI (Wilder) + dual EMA per pair.
//
// - Semua state O(1): running sum untuk seed, tanpa window/history.
// - Snapshot di-copy keluar; state internal tidak pernah dibagi.
// - Sebelum RSI dan kedua EMA ter-seed, snapshot `ready == false`
//   dan strategy tidak boleh mengeluarkan sinyal.
//

/// Wilder-smoothed RSI. Seeded by the simple average of the first `period` changes.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<f64>,
    seed_n: usize,
    seed_gain: f64,
    seed_loss: f64,
    avg_gain: f64,
    avg_loss: f64,
    seeded: bool,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "RSI period must be >= 1");
        Self {
            period,
            prev_close: None,
            seed_n: 0,
            seed_gain: 0.0,
            seed_loss: 0.0,
            avg_gain: 0.0,
            avg_loss: 0.0,
            seeded: false,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        let prev = match self.prev_close.replace(close) {
            Some(p) => p,
            None => return None,
        };
        let delta = close - prev;
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        let n = self.period as f64;

        if self.seeded {
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        } else {
            self.seed_n += 1;
            self.seed_gain += gain;
            self.seed_loss += loss;
            if self.seed_n < self.period {
                return None;
            }
            self.avg_gain = self.seed_gain / n;
            self.avg_loss = self.seed_loss / n;
            self.seeded = true;
        }
        Some(self.value())
    }

    fn value(&self) -> f64 {
        if self.avg_loss == 0.0 {
            return 100.0;
        }
        let rsi = 100.0 - 100.0 / (1.0 + self.avg_gain / self.avg_loss);
        rsi.clamp(0.0, 100.0)
    }
}

/// EMA seeded by the simple average of the first `period` samples.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    k: f64,
    seed_n: usize,
    seed_sum: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self { period, k: 2.0 / (period as f64 + 1.0), seed_n: 0, seed_sum: 0.0, value: None }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        match self.value {
            Some(prev) => self.value = Some(price * self.k + prev * (1.0 - self.k)),
            None => {
                self.seed_n += 1;
                self.seed_sum += price;
                if self.seed_n >= self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
            }
        }
        self.value
    }

    pub fn value(&self) -> Option<f64> { self.value }
}

/// Copy of the per-pair indicator state after one update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub fast: Option<f64>,
    pub slow: Option<f64>,
    pub prev_fast: Option<f64>,
    pub prev_slow: Option<f64>,
    pub samples: u64,
}

impl IndicatorSnapshot {
    pub fn is_ready(&self) -> bool {
        self.rsi.is_some() && self.fast.is_some() && self.slow.is_some()
    }

    /// Fast crossed above slow on this update.
    pub fn golden_cross(&self) -> bool {
        match (self.prev_fast, self.prev_slow, self.fast, self.slow) {
            (Some(pf), Some(ps), Some(f), Some(s)) => pf <= ps && f > s,
            _ => false,
        }
    }

    /// Fast crossed below slow on this update.
    pub fn death_cross(&self) -> bool {
        match (self.prev_fast, self.prev_slow, self.fast, self.slow) {
            (Some(pf), Some(ps), Some(f), Some(s)) => pf >= ps && f < s,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndicatorParams { pub rsi_period: usize, pub ema_fast: usize, pub ema_slow: usize }

impl Default for IndicatorParams {
    fn default() -> Self { Self { rsi_period: 14, ema_fast: 12, ema_slow: 26 } }
}

/// Indicator state for one pair. Owned by that pair's loop only.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    pair: String,
    rsi: Rsi,
    fast: Ema,
    slow: Ema,
    last: IndicatorSnapshot,
}

impl IndicatorEngine {
    pub fn new(pair: impl Into<String>, params: IndicatorParams) -> Self {
        Self {
            pair: pair.into(),
            rsi: Rsi::new(params.rsi_period),
            fast: Ema::new(params.ema_fast),
            slow: Ema::new(params.ema_slow),
            last: IndicatorSnapshot::default(),
        }
    }

    pub fn pair(&self) -> &str { &self.pair }

    pub fn snapshot(&self) -> IndicatorSnapshot { self.last }

    pub fn update(&mut self, close: f64) -> IndicatorSnapshot {
        let prev_fast = self.fast.value();
        let prev_slow = self.slow.value();
        let rsi = self.rsi.update(close);
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);
        self.last = IndicatorSnapshot {
            rsi,
            fast,
            slow,
            prev_fast,
            prev_slow,
            samples: self.last.samples + 1,
        };
        self.last
    }
}
