//! Exchange gateway: request signing, dispatch and response classification

mod client;
mod models;
mod sign;

pub use client::{ExchangeClient, ExchangePosition, OrderOutcome, DEFAULT_BASE_URL};
pub use models::ApiResponse;
pub use sign::{canonical_query, sign_request, signing_payload};

use thiserror::Error;

/// Gateway failure taxonomy.
///
/// Auth failures are fatal for the whole session: retrying a bad signature
/// wastes rate-limit budget and may indicate clock skew or compromised
/// credentials. Rate limits and transport faults are retryable with bounded
/// backoff. Data and rejection failures skip the tick for that pair.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited by exchange")]
    RateLimited,

    #[error("transient transport failure: {0}")]
    Transport(String),

    #[error("request rejected by exchange: {0}")]
    Rejected(String),

    #[error("unexpected response payload: {0}")]
    Data(String),
}

impl GatewayError {
    /// Whether a bounded backoff retry is appropriate
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transport(_))
    }

    /// Whether the whole session must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}
