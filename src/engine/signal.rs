//! Trade/no-trade decision engine
//!
//! A pure function of the current indicator and sentiment snapshots: no state
//! is carried between ticks, so every decision is reproducible from its
//! logged inputs. An optional advisory hint may upgrade a HOLD into a trade
//! but never overrides a rule-decided direction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::advisor::AdvisoryHint;
use crate::engine::indicators::IndicatorSnapshot;
use crate::engine::sentiment::SentimentSnapshot;
use crate::types::Direction;

/// Decision thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalThresholds {
    /// RSI below this is oversold (default: 30)
    pub rsi_oversold: f64,
    /// RSI above this is overbought (default: 70)
    pub rsi_overbought: f64,
    /// K and D both below this is oversold (default: 20)
    pub stoch_oversold: f64,
    /// K and D both above this is overbought (default: 80)
    pub stoch_overbought: f64,
    /// Price position below this supports a long entry (default: 30)
    pub price_position_low: f64,
    /// Price position above this supports a short entry (default: 70)
    pub price_position_high: f64,
    /// Minimum quote-notional intensity for a strong trend (default: 1000)
    pub volume_intensity_min: f64,
    /// Composite magnitude gate for should_trade (default: 0.5)
    pub composite_min: f64,
    /// Minimum advisory confidence to upgrade a HOLD (default: 0.6)
    pub advisory_min_confidence: f64,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            stoch_oversold: 20.0,
            stoch_overbought: 80.0,
            price_position_low: 30.0,
            price_position_high: 70.0,
            volume_intensity_min: 1000.0,
            composite_min: 0.5,
            advisory_min_confidence: 0.6,
        }
    }
}

/// Score components behind a decision, kept for the audit log
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContributingScores {
    /// +1 buy rule, −1 sell rule, 0 neither
    pub technical: f64,
    /// Mean of trend strength, volume trend and momentum
    pub sentiment: f64,
    /// technical × 0.6 + sentiment × 0.4
    pub composite: f64,
}

/// One decision for one pair at one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub pair: String,
    pub timestamp: DateTime<Utc>,
    pub should_trade: bool,
    pub direction: Option<Direction>,
    /// Decision confidence in [0, 1]
    pub confidence: f64,
    pub scores: ContributingScores,
    /// True when an advisory hint upgraded a HOLD into this trade
    pub advisory_applied: bool,
}

impl Signal {
    fn hold(pair: &str, scores: ContributingScores) -> Self {
        Self {
            pair: pair.to_string(),
            timestamp: Utc::now(),
            should_trade: false,
            direction: None,
            confidence: 0.0,
            scores,
            advisory_applied: false,
        }
    }
}

/// Evaluates snapshots into a trade decision
#[derive(Debug, Clone, Default)]
pub struct SignalEngine {
    thresholds: SignalThresholds,
}

impl SignalEngine {
    pub fn new(thresholds: SignalThresholds) -> Self {
        Self { thresholds }
    }

    /// Decide for one pair. Emits one structured log line per decision.
    pub fn evaluate(
        &self,
        pair: &str,
        snap: &IndicatorSnapshot,
        sentiment: &SentimentSnapshot,
        hint: Option<&AdvisoryHint>,
    ) -> Signal {
        let t = &self.thresholds;

        // Market strength is the sign of the latest price change; a zero
        // change arms neither trend flag, so buy and sell conditions are
        // mutually exclusive by construction.
        let strong_volume = snap.volume_intensity > t.volume_intensity_min;
        let trend_strong_up = snap.price_change_pct > 0.0 && strong_volume;
        let trend_strong_down = snap.price_change_pct < 0.0 && strong_volume;

        let rsi_oversold = snap.rsi < t.rsi_oversold;
        let rsi_overbought = snap.rsi > t.rsi_overbought;
        let kdj_oversold = snap.stoch_k < t.stoch_oversold && snap.stoch_d < t.stoch_oversold;
        let kdj_overbought = snap.stoch_k > t.stoch_overbought && snap.stoch_d > t.stoch_overbought;

        let buy_rule = trend_strong_up
            && (rsi_oversold || kdj_oversold)
            && snap.price_position < t.price_position_low;
        let sell_rule = trend_strong_down
            && (rsi_overbought || kdj_overbought)
            && snap.price_position > t.price_position_high;

        let technical = if buy_rule {
            1.0
        } else if sell_rule {
            -1.0
        } else {
            0.0
        };
        let sentiment_score =
            (sentiment.trend_strength + sentiment.volume_trend + sentiment.momentum) / 3.0;
        let composite = technical * 0.6 + sentiment_score * 0.4;

        let scores = ContributingScores {
            technical,
            sentiment: sentiment_score,
            composite,
        };

        let mut signal = if composite.abs() > t.composite_min {
            let direction = if composite > 0.0 {
                Direction::Buy
            } else {
                Direction::Sell
            };
            Signal {
                pair: pair.to_string(),
                timestamp: Utc::now(),
                should_trade: true,
                direction: Some(direction),
                confidence: composite.abs().min(1.0),
                scores,
                advisory_applied: false,
            }
        } else {
            Signal::hold(pair, scores)
        };

        if let Some(hint) = hint {
            self.apply_hint(&mut signal, hint);
        }

        info!(
            pair,
            should_trade = signal.should_trade,
            direction = ?signal.direction,
            confidence = signal.confidence,
            technical = scores.technical,
            sentiment = scores.sentiment,
            composite = scores.composite,
            rsi = snap.rsi,
            stoch_k = snap.stoch_k,
            stoch_d = snap.stoch_d,
            price_position = snap.price_position,
            volume_intensity = snap.volume_intensity,
            advisory_applied = signal.advisory_applied,
            "signal evaluated"
        );

        signal
    }

    /// Upgrade-only advisory blending: a hint may turn a HOLD into a trade,
    /// never flip or amplify a rule decision.
    fn apply_hint(&self, signal: &mut Signal, hint: &AdvisoryHint) {
        if signal.should_trade {
            if signal.direction != Some(hint.direction) {
                debug!(
                    pair = %signal.pair,
                    rule = ?signal.direction,
                    hint = ?hint.direction,
                    "advisory hint opposes rule decision, ignored"
                );
            }
            return;
        }

        if hint.confidence >= self.thresholds.advisory_min_confidence {
            info!(
                pair = %signal.pair,
                direction = %hint.direction,
                confidence = hint.confidence,
                "advisory hint upgraded HOLD to trade"
            );
            signal.should_trade = true;
            signal.direction = Some(hint.direction);
            signal.confidence = hint.confidence.clamp(0.0, 1.0);
            signal.advisory_applied = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::indicators::IndicatorEngine;
    use crate::types::TickerSnapshot;
    use chrono::Utc;

    fn snapshot(
        rsi: f64,
        stoch_k: f64,
        stoch_d: f64,
        price_position: f64,
        price_change_pct: f64,
        volume_intensity: f64,
    ) -> IndicatorSnapshot {
        let ticker =
            TickerSnapshot::new("BTC_USDT_PERP", 100.0, 101.0, 99.0, 100.0, 0.0, 0.0, 0, Utc::now());
        IndicatorSnapshot {
            rsi,
            stoch_k,
            stoch_d,
            price_position,
            price_change_pct,
            volume_intensity,
            ..IndicatorEngine::from_ticker(&ticker)
        }
    }

    fn neutral_sentiment() -> SentimentSnapshot {
        SentimentSnapshot::default()
    }

    #[test]
    fn test_oversold_uptrend_buys() {
        let engine = SignalEngine::default();
        let snap = snapshot(25.0, 15.0, 18.0, 20.0, 2.5, 5_000.0);
        let signal = engine.evaluate("BTC_USDT_PERP", &snap, &neutral_sentiment(), None);
        assert!(signal.should_trade);
        assert_eq!(signal.direction, Some(Direction::Buy));
        assert!(signal.confidence > 0.0);
    }

    #[test]
    fn test_overbought_downtrend_sells() {
        let engine = SignalEngine::default();
        let snap = snapshot(75.0, 85.0, 88.0, 80.0, -2.5, 5_000.0);
        let signal = engine.evaluate("BTC_USDT_PERP", &snap, &neutral_sentiment(), None);
        assert!(signal.should_trade);
        assert_eq!(signal.direction, Some(Direction::Sell));
    }

    #[test]
    fn test_all_neutral_holds() {
        let engine = SignalEngine::default();
        let snap = snapshot(50.0, 50.0, 50.0, 50.0, 0.0, 0.0);
        let signal = engine.evaluate("BTC_USDT_PERP", &snap, &neutral_sentiment(), None);
        assert!(!signal.should_trade);
        assert_eq!(signal.direction, None);
        assert_eq!(signal.scores.composite, 0.0);
    }

    #[test]
    fn test_weak_volume_blocks_trend() {
        let engine = SignalEngine::default();
        // Oversold in an uptrend, but volume intensity below the floor
        let snap = snapshot(25.0, 15.0, 18.0, 20.0, 2.5, 100.0);
        let signal = engine.evaluate("BTC_USDT_PERP", &snap, &neutral_sentiment(), None);
        assert!(!signal.should_trade);
    }

    #[test]
    fn test_buy_and_sell_rules_are_exclusive() {
        let engine = SignalEngine::default();
        let grid = [0.0, 10.0, 25.0, 50.0, 75.0, 90.0, 100.0];
        let changes = [-3.0, -0.5, 0.0, 0.5, 3.0];
        for &rsi in &grid {
            for &k in &grid {
                for &d in &grid {
                    for &pos in &grid {
                        for &change in &changes {
                            let snap = snapshot(rsi, k, d, pos, change, 10_000.0);
                            let signal = engine.evaluate(
                                "BTC_USDT_PERP",
                                &snap,
                                &neutral_sentiment(),
                                None,
                            );
                            if let Some(direction) = signal.direction {
                                // A buy can only fire with a rising change,
                                // a sell only with a falling one
                                match direction {
                                    Direction::Buy => assert!(change > 0.0),
                                    Direction::Sell => assert!(change < 0.0),
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_sentiment_alone_cannot_cross_gate() {
        let engine = SignalEngine::default();
        let snap = snapshot(50.0, 50.0, 50.0, 50.0, 1.0, 10_000.0);
        let sentiment = SentimentSnapshot {
            trend_strength: 1.0,
            volume_trend: 1.0,
            momentum: 1.0,
            ..SentimentSnapshot::default()
        };
        // No technical rule fired: composite = 0.4 × 1.0, below the 0.5 gate
        let signal = engine.evaluate("BTC_USDT_PERP", &snap, &sentiment, None);
        assert!(!signal.should_trade);
    }

    #[test]
    fn test_advisory_upgrades_hold() {
        let engine = SignalEngine::default();
        let snap = snapshot(50.0, 50.0, 50.0, 50.0, 0.0, 0.0);
        let hint = AdvisoryHint {
            direction: Direction::Buy,
            confidence: 0.8,
            rationale: Some("funding skew".to_string()),
        };
        let signal = engine.evaluate("BTC_USDT_PERP", &snap, &neutral_sentiment(), Some(&hint));
        assert!(signal.should_trade);
        assert_eq!(signal.direction, Some(Direction::Buy));
        assert_eq!(signal.confidence, 0.8);
        assert!(signal.advisory_applied);
    }

    #[test]
    fn test_low_confidence_advisory_ignored() {
        let engine = SignalEngine::default();
        let snap = snapshot(50.0, 50.0, 50.0, 50.0, 0.0, 0.0);
        let hint = AdvisoryHint {
            direction: Direction::Buy,
            confidence: 0.3,
            rationale: None,
        };
        let signal = engine.evaluate("BTC_USDT_PERP", &snap, &neutral_sentiment(), Some(&hint));
        assert!(!signal.should_trade);
        assert!(!signal.advisory_applied);
    }

    #[test]
    fn test_flat_market_full_pipeline_holds() {
        use crate::engine::indicators::IndicatorEngine;
        use crate::engine::sentiment::SentimentScorer;
        use crate::types::{Candle, CandleSeries};
        use chrono::TimeZone;

        let candles: Vec<Candle> = (0..210)
            .map(|i| Candle {
                open_time: Utc.timestamp_opt(1_700_000_000 + i * 3600, 0).unwrap(),
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: 5.0,
            })
            .collect();
        let series = CandleSeries::from_candles("BTC_USDT_PERP", "60M", candles);

        let snap = IndicatorEngine::default().compute(&series).unwrap();
        assert_eq!(snap.price_position, 50.0);
        assert_eq!(snap.stoch_k, 50.0);

        let sentiment = SentimentScorer::default().score(&series, &snap);
        let signal = SignalEngine::default().evaluate("BTC_USDT_PERP", &snap, &sentiment, None);
        assert!(!signal.should_trade);
        assert_eq!(signal.direction, None);
    }

    #[test]
    fn test_advisory_never_flips_rule_decision() {
        let engine = SignalEngine::default();
        let snap = snapshot(25.0, 15.0, 18.0, 20.0, 2.5, 5_000.0);
        let hint = AdvisoryHint {
            direction: Direction::Sell,
            confidence: 0.99,
            rationale: None,
        };
        let signal = engine.evaluate("BTC_USDT_PERP", &snap, &neutral_sentiment(), Some(&hint));
        assert!(signal.should_trade);
        assert_eq!(signal.direction, Some(Direction::Buy));
        assert!(!signal.advisory_applied);
    }
}
