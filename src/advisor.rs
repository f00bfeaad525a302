//! Optional trade advisory seam
//!
//! An advisor is an external collaborator (typically an LLM service) that
//! may suggest a direction and confidence for the current snapshots. Its
//! output is an untrusted hint: the signal engine only lets it upgrade a
//! HOLD, never override a rule decision, and the engine runs fine with no
//! advisor attached. Advisory failures are logged by the caller and never
//! abort a tick.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::indicators::IndicatorSnapshot;
use crate::engine::sentiment::SentimentSnapshot;
use crate::types::Direction;

/// A suggested trade from an advisory collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryHint {
    pub direction: Direction,
    /// Advisor's own confidence in [0, 1]
    pub confidence: f64,
    /// Free-form reasoning, kept only for the audit log
    pub rationale: Option<String>,
}

/// Best-effort advisory interface the controller may or may not hold
#[async_trait]
pub trait TradeAdvisor: Send + Sync {
    /// Suggest a trade for the current snapshots, or nothing.
    ///
    /// Returning `Ok(None)` means "no opinion"; an `Err` is treated the
    /// same way by the caller after logging.
    async fn advise(
        &self,
        pair: &str,
        snapshot: &IndicatorSnapshot,
        sentiment: &SentimentSnapshot,
    ) -> Result<Option<AdvisoryHint>>;
}
