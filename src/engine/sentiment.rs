//! Market sentiment scoring
//!
//! Derives a bounded composite sentiment from the indicator snapshot and the
//! recent return/volume history. Infallible by policy: whenever the source
//! data is too short for a component, that component reads its neutral
//! default and the pipeline continues.

use serde::{Deserialize, Serialize};

use crate::engine::indicators::IndicatorSnapshot;
use crate::types::{CandleSeries, TickerSnapshot};

/// Bounded sentiment readings for one pair at one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentSnapshot {
    /// Fear/greed composite, 0 (fear) to 100 (greed)
    pub fear_greed_index: f64,
    /// Signed EMA spread: magnitude is strength, sign is direction
    pub trend_strength: f64,
    /// Current volume relative to its 20-interval mean
    pub volume_trend: f64,
    /// Std-dev of percent returns (or 24h range ratio on the ticker path)
    pub volatility_level: f64,
    /// Close relative to 20 intervals ago
    pub momentum: f64,
}

impl Default for SentimentSnapshot {
    /// The defined neutral prior, used whenever source data is insufficient
    fn default() -> Self {
        Self {
            fear_greed_index: 50.0,
            trend_strength: 0.0,
            volume_trend: 0.0,
            volatility_level: 0.0,
            momentum: 0.0,
        }
    }
}

/// Sentiment lookback windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentConfig {
    /// Return-series window for volatility and volume change (default: 14)
    pub returns_window: usize,
    /// Volume moving-average window (default: 20)
    pub volume_ma_window: usize,
    /// Momentum lookback in intervals (default: 20)
    pub momentum_lookback: usize,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            returns_window: 14,
            volume_ma_window: 20,
            momentum_lookback: 20,
        }
    }
}

/// Scores sentiment from indicators plus recent history
#[derive(Debug, Clone, Default)]
pub struct SentimentScorer {
    config: SentimentConfig,
}

impl SentimentScorer {
    pub fn new(config: SentimentConfig) -> Self {
        Self { config }
    }

    /// Score from a full candle series and its indicator snapshot
    pub fn score(&self, series: &CandleSeries, snap: &IndicatorSnapshot) -> SentimentSnapshot {
        let closes = series.closes();
        let volumes = series.volumes();

        let price_volatility = std_dev(&pct_changes(&closes, self.config.returns_window));
        let volume_change = mean(&pct_changes(&volumes, self.config.returns_window));

        let fear_greed_index = fear_greed(
            price_volatility,
            volume_change,
            snap.rsi,
            snap.bb_bandwidth,
        );

        let trend_strength = if snap.ema_slow != 0.0 {
            (snap.ema_fast - snap.ema_slow) / snap.ema_slow
        } else {
            0.0
        };

        let volume_trend = {
            let window = self.config.volume_ma_window;
            if volumes.len() >= window {
                let ma = volumes[volumes.len() - window..].iter().sum::<f64>() / window as f64;
                let current = *volumes.last().expect("checked non-empty");
                if ma != 0.0 {
                    (current - ma) / ma
                } else {
                    0.0
                }
            } else {
                0.0
            }
        };

        let momentum = {
            let lookback = self.config.momentum_lookback;
            if closes.len() > lookback {
                let past = closes[closes.len() - 1 - lookback];
                if past != 0.0 {
                    closes[closes.len() - 1] / past - 1.0
                } else {
                    0.0
                }
            } else {
                0.0
            }
        };

        SentimentSnapshot {
            fear_greed_index,
            trend_strength,
            volume_trend,
            volatility_level: price_volatility,
            momentum,
        }
    }

    /// Score from a 24h ticker when no candle history is available
    pub fn score_ticker(&self, ticker: &TickerSnapshot) -> SentimentSnapshot {
        if ticker.close <= 0.0 {
            return SentimentSnapshot::default();
        }

        let volatility_level = ticker.true_range / ticker.close;
        // No return or volume history: those components read neutral
        let fear_greed_index = fear_greed(volatility_level, 0.0, 50.0, 0.0);

        SentimentSnapshot {
            fear_greed_index,
            trend_strength: 0.0,
            volume_trend: 0.0,
            volatility_level,
            momentum: ticker.price_change_pct / 100.0,
        }
    }
}

/// Fear/greed composite, clamped to [0, 100]
fn fear_greed(price_volatility: f64, volume_change: f64, rsi: f64, bb_bandwidth: f64) -> f64 {
    let raw = (1.0 - price_volatility) * 0.3
        + volume_change * 0.2
        + (rsi / 100.0) * 0.3
        + bb_bandwidth * 0.2;
    (raw * 100.0).clamp(0.0, 100.0)
}

/// Fractional changes over the last `window` steps; empty when too short
fn pct_changes(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window + 1 {
        return Vec::new();
    }
    values[values.len() - window - 1..]
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
