//! Decision core: indicators, sentiment, signals, risk and positions
//!
//! Everything in this module is pure and synchronous; the controller owns
//! the only suspension points (gateway calls) and feeds snapshots in.

pub mod indicators;
pub mod position;
pub mod risk;
pub mod sentiment;
pub mod signal;

pub use indicators::{IndicatorEngine, IndicatorError, IndicatorSnapshot};
pub use position::{Position, PositionBook};
pub use risk::{CloseReason, ReduceReason, RiskManager, TradeTargets};
pub use sentiment::{SentimentScorer, SentimentSnapshot};
pub use signal::{Signal, SignalEngine, SignalThresholds};
