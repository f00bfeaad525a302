//! Engine configuration
//!
//! All limits are owned by the configuration collaborator and read-only to
//! the engine. Credentials never live here: they come from the environment
//! and are threaded straight into the gateway.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::engine::indicators::IndicatorConfig;
use crate::engine::sentiment::SentimentConfig;
use crate::engine::signal::SignalThresholds;

/// Whether orders are dispatched or only decided and logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeMode {
    /// Full pipeline, orders logged and broadcast but never sent
    DryRun,
    /// Orders are signed and dispatched to the exchange
    Live,
}

impl Default for TradeMode {
    fn default() -> Self {
        Self::DryRun
    }
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DryRun => write!(f, "DryRun"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Risk appetite presets scaling the base position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskLevel {
    /// Multiplier applied to the base position fraction
    pub fn position_multiplier(&self) -> f64 {
        match self {
            Self::Conservative => 0.5,
            Self::Moderate => 1.0,
            Self::Aggressive => 1.5,
        }
    }
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Moderate
    }
}

/// Hard limits for sizing and de-risking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Fraction of equity forming the base position (default: 0.1)
    pub base_position_fraction: f64,
    /// Fraction of equity a position may never exceed (default: 0.3)
    pub max_position_fraction: f64,
    /// Upper bound on configured leverage (default: 10)
    pub max_leverage: u32,
    /// Daily realized loss, in quote units, that halts new entries
    /// (default: 100.0)
    pub daily_loss_limit: f64,
    /// Unrealized loss fraction forcing an immediate close (default: 0.02)
    pub max_loss_pct: f64,
    /// Base take-profit fraction before confidence scaling (default: 0.02)
    pub base_take_profit_pct: f64,
    /// Base stop-loss fraction before confidence scaling (default: 0.01)
    pub base_stop_loss_pct: f64,
    /// Trailing stop distance as a fraction of price (default: 0.01)
    pub trailing_stop_pct: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            base_position_fraction: 0.1,
            max_position_fraction: 0.3,
            max_leverage: 10,
            daily_loss_limit: 100.0,
            max_loss_pct: 0.02,
            base_take_profit_pct: 0.02,
            base_stop_loss_pct: 0.01,
            trailing_stop_pct: 0.01,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Pairs to evaluate each tick, in order
    pub pairs: Vec<String>,
    /// Kline interval requested from the exchange
    pub interval: String,
    /// Candles fetched per poll; must cover the slow EMA warm-up
    pub candle_limit: usize,
    /// Seconds between polling ticks
    pub poll_secs: u64,
    pub mode: TradeMode,
    pub risk_level: RiskLevel,
    /// Futures leverage, clamped to `risk.max_leverage`
    pub leverage: u32,
    /// Optional per-pair capital allocation fractions; pairs not listed
    /// share the full equity
    pub allocations: HashMap<String, f64>,
    pub risk: RiskLimits,
    pub signal: SignalThresholds,
    pub indicators: IndicatorConfig,
    pub sentiment: SentimentConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            pairs: vec!["BTC_USDT_PERP".to_string(), "ETH_USDT_PERP".to_string()],
            interval: "60M".to_string(),
            candle_limit: 220,
            poll_secs: 60,
            mode: TradeMode::default(),
            risk_level: RiskLevel::default(),
            leverage: 1,
            allocations: HashMap::new(),
            risk: RiskLimits::default(),
            signal: SignalThresholds::default(),
            indicators: IndicatorConfig::default(),
            sentiment: SentimentConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load from a JSON file; missing fields fall back to defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run safely
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.pairs.is_empty(), "at least one trading pair is required");
        anyhow::ensure!(self.poll_secs > 0, "poll interval must be positive");
        anyhow::ensure!(
            self.candle_limit >= self.indicators.ema_slow,
            "candle_limit {} does not cover the {}-candle warm-up",
            self.candle_limit,
            self.indicators.ema_slow
        );
        anyhow::ensure!(
            self.risk.base_position_fraction > 0.0
                && self.risk.base_position_fraction <= self.risk.max_position_fraction,
            "base position fraction must be positive and within the max fraction"
        );
        anyhow::ensure!(
            self.risk.max_position_fraction <= 1.0,
            "max position fraction above 1.0 would size past equity"
        );
        Ok(())
    }

    /// Effective leverage after clamping to the configured maximum
    pub fn effective_leverage(&self) -> u32 {
        self.leverage.clamp(1, self.risk.max_leverage)
    }

    /// Equity fraction allocated to a pair (1.0 when unallocated)
    pub fn allocation(&self, pair: &str) -> f64 {
        self.allocations.get(pair).copied().unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        BotConfig::default().validate().unwrap();
    }

    #[test]
    fn test_candle_limit_must_cover_warmup() {
        let mut config = BotConfig::default();
        config.candle_limit = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_pairs_rejected() {
        let mut config = BotConfig::default();
        config.pairs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_leverage_clamped() {
        let mut config = BotConfig::default();
        config.leverage = 50;
        assert_eq!(config.effective_leverage(), config.risk.max_leverage);
        config.leverage = 0;
        assert_eq!(config.effective_leverage(), 1);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: BotConfig =
            serde_json::from_str(r#"{"pairs": ["SOL_USDT_PERP"], "poll_secs": 30}"#).unwrap();
        assert_eq!(config.pairs, vec!["SOL_USDT_PERP"]);
        assert_eq!(config.poll_secs, 30);
        assert_eq!(config.risk.max_position_fraction, 0.3);
        assert_eq!(config.mode, TradeMode::DryRun);
    }

    #[test]
    fn test_allocation_defaults_to_full() {
        let mut config = BotConfig::default();
        config
            .allocations
            .insert("BTC_USDT_PERP".to_string(), 0.6);
        assert_eq!(config.allocation("BTC_USDT_PERP"), 0.6);
        assert_eq!(config.allocation("ETH_USDT_PERP"), 1.0);
    }
}
