//! Technical indicator computation
//!
//! Pure functions over OHLCV columns, no I/O and no hidden state: the same
//! series always produces the same snapshot. The engine withholds a snapshot
//! until the slow trend EMA window is covered; callers treat that as a
//! skipped tick, not a failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CandleSeries, TickerSnapshot};

/// Indicator lookback windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// RSI window (default: 14)
    pub rsi_period: usize,
    /// Stochastic RSV lookback (default: 9)
    pub stoch_n: usize,
    /// Stochastic K smoothing (default: 3)
    pub stoch_m1: usize,
    /// Stochastic D smoothing (default: 3)
    pub stoch_m2: usize,
    /// MACD fast EMA span (default: 12)
    pub macd_fast: usize,
    /// MACD slow EMA span (default: 26)
    pub macd_slow: usize,
    /// MACD signal EMA span (default: 9)
    pub macd_signal: usize,
    /// Bollinger window (default: 20)
    pub bb_period: usize,
    /// Bollinger band width in standard deviations (default: 2.0)
    pub bb_std: f64,
    /// ATR window (default: 14)
    pub atr_period: usize,
    /// Fast trend EMA span (default: 50)
    pub ema_fast: usize,
    /// Slow trend EMA span (default: 200); also the warm-up length
    pub ema_slow: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            stoch_n: 9,
            stoch_m1: 3,
            stoch_m2: 3,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std: 2.0,
            atr_period: 14,
            ema_fast: 50,
            ema_slow: 200,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("insufficient candle history: need {needed}, have {got}")]
    InsufficientData { needed: usize, got: usize },
}

/// Immutable indicator readings for one pair at one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
    pub stoch_j: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    /// (upper − lower) / middle
    pub bb_bandwidth: f64,
    pub atr: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub obv: f64,
    /// Position of the close within the stochastic lookback range, 0–100
    pub price_position: f64,
    /// Quote notional intensity of the latest interval
    pub volume_intensity: f64,
    /// Percent change of the close over the previous interval
    pub price_change_pct: f64,
    pub close: f64,
}

/// Exponential moving average, seeded with the first value.
///
/// Multiplier `k = 2 / (span + 1)`, applied from the start of the series so
/// the output has the same length as the input. Empty input or zero span
/// yields an empty `Vec`.
pub fn ema(prices: &[f64], span: usize) -> Vec<f64> {
    if prices.is_empty() || span == 0 {
        return Vec::new();
    }

    let k = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(prices.len());
    let mut prev = prices[0];
    out.push(prev);
    for &price in &prices[1..] {
        prev = price * k + prev * (1.0 - k);
        out.push(prev);
    }
    out
}

/// Relative Strength Index over a rolling mean of the last `period` deltas.
///
/// Boundary rules, not exceptions: zero average loss with gains present
/// saturates at 100; a fully flat window reads neutral 50. Insufficient
/// data also reads 50.
pub fn rsi(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return 50.0;
    }

    let deltas: Vec<f64> = prices[prices.len() - period - 1..]
        .windows(2)
        .map(|w| w[1] - w[0])
        .collect();

    let avg_gain: f64 = deltas.iter().filter(|&&d| d > 0.0).sum::<f64>() / period as f64;
    let avg_loss: f64 = -deltas.iter().filter(|&&d| d < 0.0).sum::<f64>() / period as f64;

    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            return 50.0;
        }
        return 100.0;
    }

    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Stochastic K/D/J.
///
/// RSV = (close − min low) / (max high − min low) × 100 over the `n` window;
/// K and D are exponentially smoothed with α = 1/m, seeded at 50;
/// J = 3K − 2D. A degenerate window (max high == min low) reads RSV 50.
/// Insufficient data reads (50, 50, 50).
pub fn stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    n: usize,
    m1: usize,
    m2: usize,
) -> (f64, f64, f64) {
    let len = closes.len();
    if n == 0 || m1 == 0 || m2 == 0 || len < n || highs.len() != len || lows.len() != len {
        return (50.0, 50.0, 50.0);
    }

    let mut k = 50.0;
    let mut d = 50.0;
    for i in (n - 1)..len {
        let window_low = lows[i + 1 - n..=i].iter().cloned().fold(f64::MAX, f64::min);
        let window_high = highs[i + 1 - n..=i]
            .iter()
            .cloned()
            .fold(f64::MIN, f64::max);
        let range = window_high - window_low;
        let rsv = if range == 0.0 {
            50.0
        } else {
            (closes[i] - window_low) / range * 100.0
        };
        k += (rsv - k) / m1 as f64;
        d += (k - d) / m2 as f64;
    }

    (k, d, 3.0 * k - 2.0 * d)
}

/// MACD line and its signal line.
///
/// Returns (0, 0) until `slow + signal` closes are available.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> (f64, f64) {
    if closes.len() < slow + signal {
        return (0.0, 0.0);
    }

    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let macd_series: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_ema = ema(&macd_series, signal);

    (
        *macd_series.last().expect("non-empty after length check"),
        *signal_ema.last().expect("non-empty after length check"),
    )
}

/// Bollinger bands over the trailing window.
///
/// Returns (upper, middle, lower, bandwidth); bandwidth is
/// (upper − lower) / middle, 0 when the middle is 0. Insufficient data
/// collapses the bands onto the last close.
pub fn bollinger(closes: &[f64], period: usize, std_mult: f64) -> (f64, f64, f64, f64) {
    let last = closes.last().copied().unwrap_or(0.0);
    if period == 0 || closes.len() < period {
        return (last, last, last, 0.0);
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = middle + std_mult * std_dev;
    let lower = middle - std_mult * std_dev;
    let bandwidth = if middle != 0.0 {
        (upper - lower) / middle
    } else {
        0.0
    };

    (upper, middle, lower, bandwidth)
}

/// Average True Range: rolling mean of the last `period` true ranges.
///
/// `TR = max(high − low, |high − prev close|, |low − prev close|)`.
/// Fewer than two bars reads 0.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    let len = closes.len();
    if period == 0 || len < 2 || highs.len() != len || lows.len() != len {
        return 0.0;
    }

    let start = len.saturating_sub(period).max(1);
    let mut sum_tr = 0.0;
    let mut count = 0usize;
    for i in start..len {
        let tr = (highs[i] - lows[i])
            .max((highs[i] - closes[i - 1]).abs())
            .max((lows[i] - closes[i - 1]).abs());
        sum_tr += tr;
        count += 1;
    }

    sum_tr / count as f64
}

/// On-balance volume: cumulative volume signed by the close-to-close move
pub fn obv(closes: &[f64], volumes: &[f64]) -> f64 {
    let mut total = 0.0;
    for i in 1..closes.len().min(volumes.len()) {
        if closes[i] > closes[i - 1] {
            total += volumes[i];
        } else if closes[i] < closes[i - 1] {
            total -= volumes[i];
        }
    }
    total
}

/// Position of the close within a high/low range, 0–100; 50 on a flat range
pub fn price_position(close: f64, high: f64, low: f64) -> f64 {
    if high == low {
        50.0
    } else {
        (close - low) / (high - low) * 100.0
    }
}

/// Assembles an [`IndicatorSnapshot`] from a candle series
#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Compute the snapshot for the latest candle.
    ///
    /// Withholds output until the series covers the slow trend EMA window;
    /// the caller skips the tick on [`IndicatorError::InsufficientData`].
    pub fn compute(&self, series: &CandleSeries) -> Result<IndicatorSnapshot, IndicatorError> {
        let needed = self.config.ema_slow;
        if series.len() < needed {
            return Err(IndicatorError::InsufficientData {
                needed,
                got: series.len(),
            });
        }

        let closes = series.closes();
        let highs = series.highs();
        let lows = series.lows();
        let volumes = series.volumes();
        let latest = series.latest().expect("non-empty after warm-up check");

        let rsi_val = rsi(&closes, self.config.rsi_period);
        let (stoch_k, stoch_d, stoch_j) = stochastic(
            &highs,
            &lows,
            &closes,
            self.config.stoch_n,
            self.config.stoch_m1,
            self.config.stoch_m2,
        );
        let (macd_val, macd_sig) = macd(
            &closes,
            self.config.macd_fast,
            self.config.macd_slow,
            self.config.macd_signal,
        );
        let (bb_upper, bb_middle, bb_lower, bb_bandwidth) =
            bollinger(&closes, self.config.bb_period, self.config.bb_std);
        let atr_val = atr(&highs, &lows, &closes, self.config.atr_period);

        let ema_fast = *ema(&closes, self.config.ema_fast)
            .last()
            .expect("non-empty closes");
        let ema_slow = *ema(&closes, self.config.ema_slow)
            .last()
            .expect("non-empty closes");

        let n = self.config.stoch_n;
        let window_low = lows[lows.len() - n..].iter().cloned().fold(f64::MAX, f64::min);
        let window_high = highs[highs.len() - n..]
            .iter()
            .cloned()
            .fold(f64::MIN, f64::max);

        let prev_close = closes[closes.len() - 2];
        let price_change_pct = if prev_close != 0.0 {
            (latest.close - prev_close) / prev_close * 100.0
        } else {
            0.0
        };

        Ok(IndicatorSnapshot {
            rsi: rsi_val,
            stoch_k,
            stoch_d,
            stoch_j,
            macd: macd_val,
            macd_signal: macd_sig,
            bb_upper,
            bb_middle,
            bb_lower,
            bb_bandwidth,
            atr: atr_val,
            ema_fast,
            ema_slow,
            obv: obv(&closes, &volumes),
            price_position: price_position(latest.close, window_high, window_low),
            volume_intensity: latest.volume * latest.close,
            price_change_pct,
            close: latest.close,
        })
    }

    /// Adapt a 24h ticker into the snapshot type.
    ///
    /// This is the single normalization path for ticker-only sources:
    /// oscillators that need history read their neutral defaults, range
    /// metrics come from the 24h aggregate.
    pub fn from_ticker(ticker: &TickerSnapshot) -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi: 50.0,
            stoch_k: 50.0,
            stoch_d: 50.0,
            stoch_j: 50.0,
            macd: 0.0,
            macd_signal: 0.0,
            bb_upper: ticker.close,
            bb_middle: ticker.close,
            bb_lower: ticker.close,
            bb_bandwidth: 0.0,
            atr: ticker.true_range,
            ema_fast: ticker.close,
            ema_slow: ticker.close,
            obv: if ticker.price_change_pct >= 0.0 {
                ticker.volume
            } else {
                -ticker.volume
            },
            price_position: price_position(ticker.close, ticker.high, ticker.low),
            volume_intensity: ticker.volume_intensity,
            price_change_pct: ticker.price_change_pct,
            close: ticker.close,
        }
    }
}
