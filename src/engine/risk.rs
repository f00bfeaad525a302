//! Risk and position sizing
//!
//! Owns the position table and the daily P&L accumulator exclusively; both
//! are mutated only after a confirmed gateway response. Everything else here
//! is pure arithmetic over the current snapshots and configured limits.

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::config::{RiskLevel, RiskLimits};
use crate::engine::position::{Position, PositionBook};
use crate::engine::sentiment::SentimentSnapshot;
use crate::types::Direction;

/// Adverse move beyond which adding to a loser is refused
const ADD_ADVERSE_LIMIT: f64 = 0.02;
/// Loss fraction that forces a reduction
const REDUCE_LOSS_PCT: f64 = 0.02;
/// Profit fraction above which drawdown protection arms
const PROTECT_PROFIT_PCT: f64 = 0.05;
/// Drawdown-from-peak fraction that triggers profit protection
const PROTECT_DRAWDOWN: f64 = 0.30;

/// Scaling factors are confined to this band to avoid runaway sizing
const FACTOR_MIN: f64 = 0.5;
const FACTOR_MAX: f64 = 1.5;

/// Stop-loss / take-profit prices for a prospective order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeTargets {
    pub take_profit: f64,
    pub stop_loss: f64,
}

/// Why the risk manager wants a position fully closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Loss breached the hard maximum, close immediately
    HardStop,
    /// Price crossed the stored stop-loss
    StopLoss,
    /// Price crossed the stored take-profit
    TakeProfit,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HardStop => write!(f, "hard stop"),
            Self::StopLoss => write!(f, "stop loss"),
            Self::TakeProfit => write!(f, "take profit"),
        }
    }
}

/// Why the risk manager wants a position reduced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceReason {
    /// Loss exceeded the reduction threshold
    LossLimit,
    /// Protected profit retraced too far from its peak
    ProfitProtection,
}

impl std::fmt::Display for ReduceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LossLimit => write!(f, "loss limit"),
            Self::ProfitProtection => write!(f, "profit protection"),
        }
    }
}

/// Risk manager: sizing, targets, trailing stops and forced de-risking
#[derive(Debug)]
pub struct RiskManager {
    limits: RiskLimits,
    risk_multiplier: f64,
    book: PositionBook,
    daily_pnl: f64,
    entries_halted: bool,
    current_day: NaiveDate,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, risk_level: RiskLevel) -> Self {
        Self {
            limits,
            risk_multiplier: risk_level.position_multiplier(),
            book: PositionBook::new(),
            daily_pnl: 0.0,
            entries_halted: false,
            current_day: Utc::now().date_naive(),
        }
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn position(&self, pair: &str) -> Option<&Position> {
        self.book.get(pair)
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    /// True while the daily loss limit blocks new entries
    pub fn entries_halted(&self) -> bool {
        self.entries_halted
    }

    /// Reset the daily accumulator when the UTC day rolls over
    pub fn roll_day(&mut self, today: NaiveDate) {
        if today != self.current_day {
            info!(
                day = %today,
                prior_pnl = self.daily_pnl,
                "new trading day, daily loss accumulator reset"
            );
            self.current_day = today;
            self.daily_pnl = 0.0;
            self.entries_halted = false;
        }
    }

    // ========================================================================
    // Sizing
    // ========================================================================

    /// Sentiment scaling factor in [0.5, 1.5]
    pub fn sentiment_factor(&self, sentiment: &SentimentSnapshot) -> f64 {
        let fear_greed_impact = 1.0 + (sentiment.fear_greed_index - 50.0) / 100.0;
        let trend_impact = 1.0 + sentiment.trend_strength * 0.5;
        let volume_impact = 1.0 + sentiment.volume_trend * 0.3;
        ((fear_greed_impact + trend_impact + volume_impact) / 3.0).clamp(FACTOR_MIN, FACTOR_MAX)
    }

    /// Shrinks with realized volatility, in [0.5, 1.5]
    pub fn volatility_factor(&self, volatility: f64) -> f64 {
        (1.0 / (1.0 + volatility.max(0.0) * 5.0)).clamp(FACTOR_MIN, FACTOR_MAX)
    }

    /// Grows with trend strength, in [0.5, 1.5]
    pub fn trend_factor(&self, trend_strength: f64) -> f64 {
        (1.0 + trend_strength).clamp(FACTOR_MIN, FACTOR_MAX)
    }

    /// Position size in quote units for a prospective entry.
    ///
    /// `min(base × sentiment × volatility × trend, equity × max_fraction)`,
    /// floored at zero. A non-positive result means the trade is skipped as
    /// a no-op, not treated as an error.
    pub fn position_size(&self, equity: f64, sentiment: &SentimentSnapshot) -> f64 {
        if equity <= 0.0 {
            return 0.0;
        }
        let base = equity * self.limits.base_position_fraction * self.risk_multiplier;
        clamp_position(
            base,
            self.sentiment_factor(sentiment),
            self.volatility_factor(sentiment.volatility_level),
            self.trend_factor(sentiment.trend_strength),
            equity * self.limits.max_position_fraction,
        )
    }

    // ========================================================================
    // Targets
    // ========================================================================

    /// Confidence-scaled stop-loss / take-profit prices.
    ///
    /// Higher confidence widens the profit target and tightens less on the
    /// stop; shorts are mirrored.
    pub fn dynamic_targets(&self, side: Direction, price: f64, confidence: f64) -> TradeTargets {
        let confidence = confidence.clamp(0.0, 1.0);
        let tp_ratio = self.limits.base_take_profit_pct * (1.0 + confidence);
        let sl_ratio = self.limits.base_stop_loss_pct * (1.0 - confidence * 0.5);
        match side {
            Direction::Buy => TradeTargets {
                take_profit: price * (1.0 + tp_ratio),
                stop_loss: price * (1.0 - sl_ratio),
            },
            Direction::Sell => TradeTargets {
                take_profit: price * (1.0 - tp_ratio),
                stop_loss: price * (1.0 + sl_ratio),
            },
        }
    }

    /// Ratchet the stored stop toward the current price, never away from it
    pub fn apply_trailing_stop(&mut self, pair: &str, price: f64) {
        let trailing = self.limits.trailing_stop_pct;
        if let Some(position) = self.book.get_mut(pair) {
            position.update_peak(price);
            let new_stop = trail_stop(position.side, price, position.stop_loss, trailing);
            if new_stop != position.stop_loss {
                debug!(
                    pair,
                    old_stop = position.stop_loss,
                    new_stop,
                    "trailing stop ratcheted"
                );
                position.stop_loss = new_stop;
            }
        }
    }

    // ========================================================================
    // Forced de-risking
    // ========================================================================

    /// Check an open position for a forced exit at the current price
    pub fn check_exit(&self, pair: &str, price: f64) -> Option<CloseReason> {
        let position = self.book.get(pair)?;
        let pnl_pct = position.unrealized_pnl_pct(price);

        if pnl_pct < -self.limits.max_loss_pct {
            return Some(CloseReason::HardStop);
        }

        let stop_hit = match position.side {
            Direction::Buy => price <= position.stop_loss,
            Direction::Sell => price >= position.stop_loss,
        };
        if stop_hit {
            return Some(CloseReason::StopLoss);
        }

        let target_hit = match position.side {
            Direction::Buy => price >= position.take_profit,
            Direction::Sell => price <= position.take_profit,
        };
        if target_hit {
            return Some(CloseReason::TakeProfit);
        }

        None
    }

    /// Adding is allowed only below the size cap and while the position is
    /// not moving against entry by more than the adverse limit
    pub fn can_add(&self, pair: &str, price: f64, equity: f64) -> bool {
        let Some(position) = self.book.get(pair) else {
            return false;
        };
        let notional = position.size * price;
        if notional >= equity * self.limits.max_position_fraction {
            return false;
        }
        let pnl_pct = position.unrealized_pnl_pct(price);
        pnl_pct >= 0.0 || pnl_pct > -ADD_ADVERSE_LIMIT
    }

    /// A reduction is forced past the loss limit, or once protected profit
    /// has retraced too far from its peak
    pub fn check_reduce(&self, pair: &str, price: f64) -> Option<ReduceReason> {
        let position = self.book.get(pair)?;
        let pnl_pct = position.unrealized_pnl_pct(price);
        if pnl_pct < -REDUCE_LOSS_PCT {
            return Some(ReduceReason::LossLimit);
        }
        if pnl_pct > PROTECT_PROFIT_PCT && position.drawdown_from_peak(price) > PROTECT_DRAWDOWN {
            return Some(ReduceReason::ProfitProtection);
        }
        None
    }

    // ========================================================================
    // Confirmed-order bookkeeping
    // ========================================================================

    /// Record a confirmed entry fill
    pub fn confirm_open(
        &mut self,
        pair: &str,
        side: Direction,
        size: f64,
        price: f64,
        targets: TradeTargets,
    ) {
        self.book.open(
            pair,
            side,
            size,
            price,
            targets.stop_loss,
            targets.take_profit,
        );
        info!(
            pair,
            %side,
            size,
            price,
            stop_loss = targets.stop_loss,
            take_profit = targets.take_profit,
            "position opened"
        );
    }

    /// Record a confirmed fill adding to an open position
    pub fn confirm_add(&mut self, pair: &str, size: f64, price: f64) {
        if let Some(position) = self.book.add_to(pair, size, price) {
            info!(
                pair,
                size,
                price,
                total_size = position.size,
                entry_price = position.entry_price,
                "position increased"
            );
        }
    }

    /// Record a confirmed partial close fill; returns the realized P&L
    pub fn confirm_reduce(&mut self, pair: &str, size: f64, price: f64) -> Option<f64> {
        let pnl = self.book.reduce(pair, size, price)?;
        self.record_pnl(pnl);
        info!(pair, size, price, pnl, daily_pnl = self.daily_pnl, "position reduced");
        Some(pnl)
    }

    /// Record a confirmed close fill; returns the realized P&L
    pub fn confirm_close(&mut self, pair: &str, price: f64) -> Option<f64> {
        let pnl = self.book.close(pair, price)?;
        self.record_pnl(pnl);
        info!(pair, price, pnl, daily_pnl = self.daily_pnl, "position closed");
        Some(pnl)
    }

    /// Fold realized P&L into the daily accumulator; breaching the daily
    /// loss limit halts new entries for the rest of the day
    pub fn record_pnl(&mut self, pnl: f64) {
        self.daily_pnl += pnl;
        if self.daily_pnl <= -self.limits.daily_loss_limit && !self.entries_halted {
            warn!(
                daily_pnl = self.daily_pnl,
                limit = self.limits.daily_loss_limit,
                "daily loss limit breached, new entries halted for the day"
            );
            self.entries_halted = true;
        }
    }
}

/// `min(base × sf × vf × tf, cap)`, floored at zero
fn clamp_position(base: f64, sf: f64, vf: f64, tf: f64, cap: f64) -> f64 {
    (base * sf * vf * tf).min(cap).max(0.0)
}

/// Candidate trailing stop: adopted only when more favorable than the
/// current stop (above it for longs, below it for shorts)
fn trail_stop(side: Direction, price: f64, current_stop: f64, trailing_pct: f64) -> f64 {
    match side {
        Direction::Buy => {
            let candidate = price * (1.0 - trailing_pct);
            if candidate > current_stop {
                candidate
            } else {
                current_stop
            }
        }
        Direction::Sell => {
            let candidate = price * (1.0 + trailing_pct);
            if candidate < current_stop {
                candidate
            } else {
                current_stop
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn manager() -> RiskManager {
        RiskManager::new(RiskLimits::default(), RiskLevel::Moderate)
    }

    #[test]
    fn test_sizing_scenario() {
        // equity 10_000, base 1_000, factors 1.2 / 0.8 / 1.0, cap 3_000
        let size = clamp_position(1_000.0, 1.2, 0.8, 1.0, 3_000.0);
        assert!((size - 960.0).abs() < 1e-9);
    }

    #[test]
    fn test_sizing_hits_cap() {
        let size = clamp_position(3_000.0, 1.5, 1.5, 1.5, 3_000.0);
        assert!((size - 3_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_sizing_bound_under_random_factors() {
        let risk = manager();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2_000 {
            let equity = rng.gen_range(0.0..1_000_000.0);
            let sentiment = SentimentSnapshot {
                fear_greed_index: rng.gen_range(0.0..100.0),
                trend_strength: rng.gen_range(-5.0..5.0),
                volume_trend: rng.gen_range(-5.0..5.0),
                volatility_level: rng.gen_range(0.0..2.0),
                momentum: rng.gen_range(-1.0..1.0),
            };
            let size = risk.position_size(equity, &sentiment);
            assert!(size >= 0.0);
            assert!(
                size <= equity * RiskLimits::default().max_position_fraction + 1e-9,
                "size {size} exceeds cap for equity {equity}"
            );
        }
    }

    #[test]
    fn test_factors_are_banded() {
        let risk = manager();
        let extreme = SentimentSnapshot {
            fear_greed_index: 100.0,
            trend_strength: 100.0,
            volume_trend: 100.0,
            volatility_level: 100.0,
            momentum: 0.0,
        };
        assert_eq!(risk.sentiment_factor(&extreme), 1.5);
        assert_eq!(risk.volatility_factor(100.0), 0.5);
        assert_eq!(risk.trend_factor(100.0), 1.5);
        assert_eq!(risk.trend_factor(-100.0), 0.5);
    }

    #[test]
    fn test_zero_equity_sizes_zero() {
        let risk = manager();
        assert_eq!(risk.position_size(0.0, &SentimentSnapshot::default()), 0.0);
    }

    #[test]
    fn test_dynamic_targets_long() {
        let risk = manager();
        let targets = risk.dynamic_targets(Direction::Buy, 100.0, 0.5);
        // tp = 100 × (1 + 0.02 × 1.5), sl = 100 × (1 − 0.01 × 0.75)
        assert!((targets.take_profit - 103.0).abs() < 1e-9);
        assert!((targets.stop_loss - 99.25).abs() < 1e-9);
    }

    #[test]
    fn test_dynamic_targets_short_mirrors() {
        let risk = manager();
        let targets = risk.dynamic_targets(Direction::Sell, 100.0, 0.5);
        assert!((targets.take_profit - 97.0).abs() < 1e-9);
        assert!((targets.stop_loss - 100.75).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_stop_monotonic_on_rising_prices() {
        let mut risk = manager();
        risk.confirm_open(
            "BTC_USDT_PERP",
            Direction::Buy,
            1.0,
            100.0,
            TradeTargets {
                take_profit: 1_000.0,
                stop_loss: 99.0,
            },
        );
        let mut last_stop = 99.0;
        for price in [101.0, 103.0, 105.0, 110.0, 120.0] {
            risk.apply_trailing_stop("BTC_USDT_PERP", price);
            let stop = risk.position("BTC_USDT_PERP").unwrap().stop_loss;
            assert!(stop >= last_stop, "stop moved backwards: {last_stop} -> {stop}");
            last_stop = stop;
        }
        assert!((last_stop - 120.0 * (1.0 - 0.01)).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_stop_never_retreats_on_falling_prices() {
        let mut risk = manager();
        risk.confirm_open(
            "BTC_USDT_PERP",
            Direction::Buy,
            1.0,
            100.0,
            TradeTargets {
                take_profit: 1_000.0,
                stop_loss: 99.0,
            },
        );
        risk.apply_trailing_stop("BTC_USDT_PERP", 110.0);
        let peak_stop = risk.position("BTC_USDT_PERP").unwrap().stop_loss;
        for price in [108.0, 105.0, 101.0] {
            risk.apply_trailing_stop("BTC_USDT_PERP", price);
            assert_eq!(risk.position("BTC_USDT_PERP").unwrap().stop_loss, peak_stop);
        }
    }

    #[test]
    fn test_short_trailing_stop_mirrors() {
        let stop = trail_stop(Direction::Sell, 90.0, 101.0, 0.01);
        assert!((stop - 90.9).abs() < 1e-9);
        // Price bouncing back up must not lift the stop
        assert_eq!(trail_stop(Direction::Sell, 95.0, 90.9, 0.01), 90.9);
    }

    #[test]
    fn test_hard_stop_fires_before_stored_stop() {
        let mut risk = manager();
        risk.confirm_open(
            "BTC_USDT_PERP",
            Direction::Buy,
            1.0,
            100.0,
            TradeTargets {
                take_profit: 110.0,
                stop_loss: 20.0,
            },
        );
        // 3% adverse move breaches the 2% hard maximum
        assert_eq!(
            risk.check_exit("BTC_USDT_PERP", 97.0),
            Some(CloseReason::HardStop)
        );
    }

    #[test]
    fn test_stop_and_target_detection() {
        let mut risk = manager();
        risk.confirm_open(
            "BTC_USDT_PERP",
            Direction::Buy,
            1.0,
            100.0,
            TradeTargets {
                take_profit: 103.0,
                stop_loss: 99.25,
            },
        );
        assert_eq!(risk.check_exit("BTC_USDT_PERP", 101.0), None);
        assert_eq!(
            risk.check_exit("BTC_USDT_PERP", 99.0),
            Some(CloseReason::StopLoss)
        );
        assert_eq!(
            risk.check_exit("BTC_USDT_PERP", 103.5),
            Some(CloseReason::TakeProfit)
        );
    }

    #[test]
    fn test_profit_protection_forces_reduction() {
        let mut risk = manager();
        risk.confirm_open(
            "BTC_USDT_PERP",
            Direction::Buy,
            1.0,
            100.0,
            TradeTargets {
                take_profit: 150.0,
                stop_loss: 10.0,
            },
        );
        // Run up 10%, then retrace 40% of the advance while still +6%
        risk.apply_trailing_stop("BTC_USDT_PERP", 110.0);
        assert_eq!(
            risk.check_reduce("BTC_USDT_PERP", 106.0),
            Some(ReduceReason::ProfitProtection)
        );
        // Still advancing: nothing to protect against
        assert_eq!(risk.check_reduce("BTC_USDT_PERP", 110.0), None);
    }

    #[test]
    fn test_partial_reduce_books_realized_pnl() {
        let mut risk = manager();
        risk.confirm_open(
            "BTC_USDT_PERP",
            Direction::Buy,
            2.0,
            100.0,
            TradeTargets {
                take_profit: 150.0,
                stop_loss: 90.0,
            },
        );
        let pnl = risk.confirm_reduce("BTC_USDT_PERP", 1.0, 110.0).unwrap();
        assert!((pnl - 10.0).abs() < 1e-9);
        assert!((risk.daily_pnl() - 10.0).abs() < 1e-9);
        assert!((risk.position("BTC_USDT_PERP").unwrap().size - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_daily_loss_halts_entries_only() {
        let mut risk = manager();
        assert!(!risk.entries_halted());
        risk.record_pnl(-RiskLimits::default().daily_loss_limit - 1.0);
        assert!(risk.entries_halted());

        // Exits still work: close bookkeeping is unaffected by the halt
        risk.confirm_open(
            "BTC_USDT_PERP",
            Direction::Buy,
            1.0,
            100.0,
            TradeTargets {
                take_profit: 110.0,
                stop_loss: 95.0,
            },
        );
        assert!(risk.confirm_close("BTC_USDT_PERP", 99.0).is_some());

        // Day rollover lifts the halt
        let tomorrow = risk.current_day.succ_opt().unwrap();
        risk.roll_day(tomorrow);
        assert!(!risk.entries_halted());
        assert_eq!(risk.daily_pnl(), 0.0);
    }

    #[test]
    fn test_add_and_reduce_rules() {
        let mut risk = manager();
        risk.confirm_open(
            "BTC_USDT_PERP",
            Direction::Buy,
            1.0,
            100.0,
            TradeTargets {
                take_profit: 150.0,
                stop_loss: 10.0,
            },
        );
        let equity = 10_000.0;
        // In profit: adding allowed
        assert!(risk.can_add("BTC_USDT_PERP", 101.0, equity));
        // 1% adverse: still within the 2% tolerance
        assert!(risk.can_add("BTC_USDT_PERP", 99.0, equity));
        // 3% adverse: refused, and a reduction is forced
        assert!(!risk.can_add("BTC_USDT_PERP", 97.0, equity));
        assert_eq!(
            risk.check_reduce("BTC_USDT_PERP", 97.0),
            Some(ReduceReason::LossLimit)
        );
        // At the notional cap: refused even in profit
        assert!(!risk.can_add("BTC_USDT_PERP", 3_500.0, equity));
    }
}
