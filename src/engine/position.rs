//! Position table and P&L bookkeeping
//!
//! Mutated only by the risk manager, and only as a reaction to a confirmed
//! order-placement result. The table starting empty is a valid state: the
//! engine assumes nothing about positions it was not told about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::Direction;

/// One open position for one pair.
///
/// Invariant: `size >= 0`; the entry price is only meaningful while
/// `size > 0`. `peak_price` is the most favorable price seen since entry
/// and drives drawdown-based profit protection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub pair: String,
    pub side: Direction,
    /// Base-asset quantity, always non-negative
    pub size: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub opened_at: DateTime<Utc>,
    pub peak_price: f64,
}

impl Position {
    /// Signed unrealized P&L in quote units at the given price
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        match self.side {
            Direction::Buy => (price - self.entry_price) * self.size,
            Direction::Sell => (self.entry_price - price) * self.size,
        }
    }

    /// Unrealized P&L as a fraction of entry price (signed)
    pub fn unrealized_pnl_pct(&self, price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        match self.side {
            Direction::Buy => (price - self.entry_price) / self.entry_price,
            Direction::Sell => (self.entry_price - price) / self.entry_price,
        }
    }

    /// Retracement from the favorable peak, as a fraction of the move from
    /// entry to peak. 0 while the position never advanced past entry.
    pub fn drawdown_from_peak(&self, price: f64) -> f64 {
        let favorable = match self.side {
            Direction::Buy => self.peak_price - self.entry_price,
            Direction::Sell => self.entry_price - self.peak_price,
        };
        if favorable <= 0.0 {
            return 0.0;
        }
        let retrace = match self.side {
            Direction::Buy => self.peak_price - price,
            Direction::Sell => price - self.peak_price,
        };
        (retrace / favorable).max(0.0)
    }

    /// Ratchet the peak toward the current price if it is more favorable
    pub fn update_peak(&mut self, price: f64) {
        match self.side {
            Direction::Buy => {
                if price > self.peak_price {
                    self.peak_price = price;
                }
            }
            Direction::Sell => {
                if price < self.peak_price {
                    self.peak_price = price;
                }
            }
        }
    }
}

/// In-memory position table, one entry per pair
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: HashMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pair: &str) -> Option<&Position> {
        self.positions.get(pair)
    }

    pub fn get_mut(&mut self, pair: &str) -> Option<&mut Position> {
        self.positions.get_mut(pair)
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Record a confirmed fill opening a new position
    pub fn open(
        &mut self,
        pair: &str,
        side: Direction,
        size: f64,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> &Position {
        let position = Position {
            pair: pair.to_string(),
            side,
            size,
            entry_price,
            stop_loss,
            take_profit,
            opened_at: Utc::now(),
            peak_price: entry_price,
        };
        self.positions.insert(pair.to_string(), position);
        self.positions.get(pair).expect("just inserted")
    }

    /// Record a confirmed fill adding to an existing position; the entry
    /// price becomes the size-weighted average.
    pub fn add_to(&mut self, pair: &str, size: f64, fill_price: f64) -> Option<&Position> {
        let position = self.positions.get_mut(pair)?;
        let total = position.size + size;
        if total > 0.0 {
            position.entry_price =
                (position.entry_price * position.size + fill_price * size) / total;
        }
        position.size = total;
        Some(position)
    }

    /// Record a confirmed partial close; returns the realized P&L.
    /// Reducing to zero removes the entry from the table.
    pub fn reduce(&mut self, pair: &str, size: f64, fill_price: f64) -> Option<f64> {
        let position = self.positions.get_mut(pair)?;
        let closed = size.min(position.size);
        let pnl = match position.side {
            Direction::Buy => (fill_price - position.entry_price) * closed,
            Direction::Sell => (position.entry_price - fill_price) * closed,
        };
        position.size -= closed;
        if position.size <= 0.0 {
            self.positions.remove(pair);
        }
        Some(pnl)
    }

    /// Record a confirmed full close; returns the realized P&L
    pub fn close(&mut self, pair: &str, fill_price: f64) -> Option<f64> {
        let size = self.positions.get(pair)?.size;
        self.reduce(pair, size, fill_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_close_long() {
        let mut book = PositionBook::new();
        book.open("BTC_USDT_PERP", Direction::Buy, 0.5, 100.0, 95.0, 110.0);
        assert!(book.get("BTC_USDT_PERP").is_some());

        let pnl = book.close("BTC_USDT_PERP", 110.0).unwrap();
        assert!((pnl - 5.0).abs() < 1e-9);
        assert!(book.get("BTC_USDT_PERP").is_none());
    }

    #[test]
    fn test_short_pnl_is_mirrored() {
        let mut book = PositionBook::new();
        book.open("ETH_USDT_PERP", Direction::Sell, 2.0, 100.0, 105.0, 90.0);
        let pnl = book.close("ETH_USDT_PERP", 90.0).unwrap();
        assert!((pnl - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_add_uses_weighted_average_entry() {
        let mut book = PositionBook::new();
        book.open("BTC_USDT_PERP", Direction::Buy, 1.0, 100.0, 95.0, 110.0);
        book.add_to("BTC_USDT_PERP", 1.0, 110.0);
        let position = book.get("BTC_USDT_PERP").unwrap();
        assert!((position.entry_price - 105.0).abs() < 1e-9);
        assert!((position.size - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_reduce_to_zero_removes_entry() {
        let mut book = PositionBook::new();
        book.open("BTC_USDT_PERP", Direction::Buy, 1.0, 100.0, 95.0, 110.0);
        let pnl = book.reduce("BTC_USDT_PERP", 1.0, 98.0).unwrap();
        assert!((pnl + 2.0).abs() < 1e-9);
        assert!(book.is_empty());
    }

    #[test]
    fn test_drawdown_from_peak() {
        let mut position = Position {
            pair: "BTC_USDT_PERP".to_string(),
            side: Direction::Buy,
            size: 1.0,
            entry_price: 100.0,
            stop_loss: 95.0,
            take_profit: 120.0,
            opened_at: Utc::now(),
            peak_price: 100.0,
        };
        position.update_peak(110.0);
        assert_eq!(position.peak_price, 110.0);
        // Advanced 10, retraced 4: 40% drawdown from peak
        assert!((position.drawdown_from_peak(106.0) - 0.4).abs() < 1e-9);
        // Peak never ratchets backwards
        position.update_peak(104.0);
        assert_eq!(position.peak_price, 110.0);
    }

    #[test]
    fn test_unrealized_pnl_pct() {
        let position = Position {
            pair: "BTC_USDT_PERP".to_string(),
            side: Direction::Sell,
            size: 1.0,
            entry_price: 200.0,
            stop_loss: 210.0,
            take_profit: 180.0,
            opened_at: Utc::now(),
            peak_price: 200.0,
        };
        assert!((position.unrealized_pnl_pct(190.0) - 0.05).abs() < 1e-9);
        assert!((position.unrealized_pnl_pct(210.0) + 0.05).abs() < 1e-9);
    }
}
