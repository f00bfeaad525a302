//! Shared market data types
//!
//! The canonical input to the indicator engine is a [`CandleSeries`]. Sources
//! that only expose 24h aggregates produce a [`TickerSnapshot`] instead, which
//! the indicator engine adapts through a single explicit path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Wire representation expected by the order endpoint
    pub fn as_order_side(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// One OHLCV interval for one pair. Immutable once received.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Ordered, append-only candle history for one pair+interval.
///
/// Only the most recent `max_len` candles are retained; the slow trend EMA
/// needs 200, so `max_len` must be at least that for a full snapshot.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    pair: String,
    interval: String,
    candles: VecDeque<Candle>,
    max_len: usize,
}

impl CandleSeries {
    pub fn new(pair: &str, interval: &str, max_len: usize) -> Self {
        Self {
            pair: pair.to_string(),
            interval: interval.to_string(),
            candles: VecDeque::with_capacity(max_len),
            max_len,
        }
    }

    /// Build a series from already-ordered candles (oldest first)
    pub fn from_candles(pair: &str, interval: &str, candles: Vec<Candle>) -> Self {
        let max_len = candles.len().max(1);
        let mut series = Self::new(pair, interval, max_len);
        for candle in candles {
            series.push(candle);
        }
        series
    }

    /// Append the next candle, dropping the oldest past capacity
    pub fn push(&mut self, candle: Candle) {
        if self.candles.len() == self.max_len {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub fn interval(&self) -> &str {
        &self.interval
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }
}

/// 24h aggregate snapshot used when no candle history is available.
///
/// Derived fields are computed once at construction and cached; downstream
/// stages read them without re-deriving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
    pub timestamp: DateTime<Utc>,
    /// 24h close-over-open change, percent
    pub price_change_pct: f64,
    /// 24h range; a daily aggregate has no previous close to widen it
    pub true_range: f64,
    /// Mean quote notional per trade
    pub volume_intensity: f64,
}

impl TickerSnapshot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        quote_volume: f64,
        trade_count: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let price_change_pct = if open != 0.0 {
            (close - open) / open * 100.0
        } else {
            0.0
        };
        let true_range = high - low;
        let volume_intensity = if trade_count > 0 {
            quote_volume / trade_count as f64
        } else {
            0.0
        };

        Self {
            symbol: symbol.to_string(),
            open,
            high,
            low,
            close,
            volume,
            quote_volume,
            trade_count,
            timestamp,
            price_change_pct,
            true_range,
            volume_intensity,
        }
    }
}
