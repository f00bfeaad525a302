//! Exchange REST client
//!
//! Every request is signed fresh at dispatch time, sent with a bounded
//! timeout, and classified per the gateway error taxonomy. Retryable
//! failures back off exponentially; order placement is never blindly
//! retried. An ambiguous timeout is reconciled against the position table
//! on the exchange before the order is declared failed.

use chrono::{TimeZone, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::models::{
    ApiResponse, BalancesData, KlinesData, OrderData, PositionsData, TickerData,
};
use super::sign;
use super::GatewayError;
use crate::types::{Candle, CandleSeries, Direction, TickerSnapshot};

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.pionex.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Quote asset whose free balance is the engine's equity
const EQUITY_COIN: &str = "USDT";

/// Result of an order placement after any reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    /// The exchange confirmed the order. The id is absent when confirmation
    /// came from position reconciliation rather than the placement response.
    Placed { order_id: Option<String> },
    /// Reconciliation confirmed the order never executed
    NotExecuted,
}

/// An open position as reported by the exchange
#[derive(Debug, Clone)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: Direction,
    pub size: f64,
    pub entry_price: f64,
}

/// Signed REST client for the exchange
pub struct ExchangeClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl ExchangeClient {
    /// Create a client with explicit credentials
    pub fn new(api_key: String, api_secret: String, base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
            base_url,
            api_key,
            api_secret,
        }
    }

    /// Create a client from environment variables
    ///
    /// Expects:
    /// - `PIONEX_API_KEY` - API key
    /// - `PIONEX_API_SECRET` - API secret
    /// - `PIONEX_BASE_URL` (optional) - API base URL
    pub fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;
        let api_key = std::env::var("PIONEX_API_KEY")
            .context("PIONEX_API_KEY environment variable not set")?;
        let api_secret = std::env::var("PIONEX_API_SECRET")
            .context("PIONEX_API_SECRET environment variable not set")?;
        let base_url =
            std::env::var("PIONEX_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(api_key, api_secret, base_url))
    }

    /// Dispatch one signed request: fresh timestamp and signature, bounded
    /// timeout, full classification of the outcome
    async fn dispatch<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<T, GatewayError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let mut signed = params.clone();
        signed.insert("timestamp".to_string(), timestamp.clone());
        let signature = sign::sign_request(&self.api_secret, method.as_str(), path, &signed);

        let url = format!("{}{}", self.base_url, path);
        debug!(%method, path, "dispatching exchange request");

        let response = self
            .client
            .request(method, &url)
            .query(&signed)
            .header("PIONEX-KEY", &self.api_key)
            .header("PIONEX-SIGNATURE", &signature)
            .header("PIONEX-TIMESTAMP", &timestamp)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_http(status, &body));
        }

        let envelope: ApiResponse<T> = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Data(format!("undecodable response from {path}: {e}")))?;

        if !envelope.result {
            return Err(classify_body(
                envelope.code.as_deref(),
                envelope.message.as_deref(),
            ));
        }

        envelope
            .data
            .ok_or_else(|| GatewayError::Data(format!("missing data field from {path}")))
    }

    /// Dispatch with capped exponential backoff on retryable failures
    async fn send_with_retry<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<T, GatewayError> {
        let mut attempt = 0u32;
        loop {
            match self.dispatch(method.clone(), path, params).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    let delay = BACKOFF_BASE * 2u32.pow(attempt);
                    warn!(
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable gateway failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    // ========================================================================
    // Market data
    // ========================================================================

    /// Fetch klines and normalize them into the canonical candle series.
    ///
    /// This is the single adapter between wire data and the indicator
    /// engine's input contract.
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<CandleSeries, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), symbol.to_string());
        params.insert("interval".to_string(), interval.to_string());
        params.insert("limit".to_string(), limit.to_string());

        let data: KlinesData = self
            .send_with_retry(Method::GET, "/api/v1/market/klines", &params)
            .await?;
        parse_klines(symbol, interval, data)
    }

    /// Fetch the 24h ticker for one symbol
    pub async fn get_ticker(&self, symbol: &str) -> Result<TickerSnapshot, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), symbol.to_string());

        let data: TickerData = self
            .send_with_retry(Method::GET, "/api/v1/market/tickers", &params)
            .await?;
        parse_ticker(data)
    }

    // ========================================================================
    // Account
    // ========================================================================

    /// Free quote-asset balance, the equity available for sizing
    pub async fn get_balance(&self) -> Result<f64, GatewayError> {
        let params = BTreeMap::new();
        let data: BalancesData = self
            .send_with_retry(Method::GET, "/api/v1/account/balances", &params)
            .await?;

        let mut equity = 0.0;
        for entry in &data.balances {
            if entry.coin == EQUITY_COIN {
                equity += parse_f64(&entry.free, "balance.free")?;
            }
        }
        Ok(equity)
    }

    /// Open positions as the exchange sees them
    pub async fn get_open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError> {
        let params = BTreeMap::new();
        let data: PositionsData = self
            .send_with_retry(Method::GET, "/api/v1/account/positions", &params)
            .await?;

        data.positions
            .into_iter()
            .map(|entry| {
                Ok(ExchangePosition {
                    side: parse_side(&entry.side)?,
                    size: parse_f64(&entry.size, "position.size")?,
                    entry_price: parse_f64(&entry.entry_price, "position.entryPrice")?,
                    symbol: entry.symbol,
                })
            })
            .collect()
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Place a market order.
    ///
    /// Never retried: a transport failure after dispatch is ambiguous (the
    /// exchange may have executed the order), so the outcome is reconciled
    /// against the exchange's position size for the symbol. `prior_size` is
    /// the size the engine held before dispatching.
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: Direction,
        quantity: f64,
        prior_size: f64,
    ) -> Result<OrderOutcome, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), symbol.to_string());
        params.insert("side".to_string(), side.as_order_side().to_string());
        params.insert("type".to_string(), "MARKET".to_string());
        params.insert("quantity".to_string(), format!("{quantity:.8}"));

        match self
            .dispatch::<OrderData>(Method::POST, "/api/v1/order", &params)
            .await
        {
            Ok(data) => {
                info!(symbol, %side, quantity, order_id = data.order_id, "order placed");
                Ok(OrderOutcome::Placed {
                    order_id: Some(data.order_id.to_string()),
                })
            }
            Err(GatewayError::Transport(reason)) => {
                warn!(
                    symbol,
                    %side,
                    reason,
                    "order placement ambiguous, reconciling against exchange positions"
                );
                let positions = self.get_open_positions().await?;
                let current_size = positions
                    .iter()
                    .find(|p| p.symbol == symbol)
                    .map(|p| p.size)
                    .unwrap_or(0.0);
                let outcome = reconcile_outcome(prior_size, current_size);
                match &outcome {
                    OrderOutcome::Placed { .. } => {
                        info!(symbol, current_size, "reconciliation: order did execute")
                    }
                    OrderOutcome::NotExecuted => {
                        info!(symbol, current_size, "reconciliation: order treated as failed")
                    }
                }
                Ok(outcome)
            }
            Err(err) => Err(err),
        }
    }
}

/// Classify a non-2xx HTTP response
fn classify_http(status: StatusCode, body: &str) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GatewayError::Auth(format!("{status}: {}", truncate(body)))
        }
        StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited,
        s if s.is_server_error() => GatewayError::Transport(format!("{status}")),
        _ => GatewayError::Rejected(format!("{status}: {}", truncate(body))),
    }
}

/// Classify a 2xx response whose body carries `result = false`
fn classify_body(code: Option<&str>, message: Option<&str>) -> GatewayError {
    let combined = format!(
        "{} {}",
        code.unwrap_or_default(),
        message.unwrap_or_default()
    )
    .to_uppercase();

    if ["SIGN", "AUTH", "APIKEY", "API_KEY", "TIMESTAMP"]
        .iter()
        .any(|needle| combined.contains(needle))
    {
        GatewayError::Auth(combined.trim().to_string())
    } else if ["RATE", "TOO_MANY", "FREQUEN"]
        .iter()
        .any(|needle| combined.contains(needle))
    {
        GatewayError::RateLimited
    } else {
        GatewayError::Rejected(combined.trim().to_string())
    }
}

/// Decide an ambiguous order's fate from the exchange-side position size
fn reconcile_outcome(prior_size: f64, current_size: f64) -> OrderOutcome {
    if (current_size - prior_size).abs() > 1e-12 {
        OrderOutcome::Placed { order_id: None }
    } else {
        OrderOutcome::NotExecuted
    }
}

/// Cap response bodies quoted into error messages
fn truncate(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}

fn parse_f64(raw: &str, field: &str) -> Result<f64, GatewayError> {
    raw.parse::<f64>()
        .map_err(|_| GatewayError::Data(format!("unparseable {field}: {raw:?}")))
}

fn parse_side(raw: &str) -> Result<Direction, GatewayError> {
    match raw.to_uppercase().as_str() {
        "BUY" | "LONG" => Ok(Direction::Buy),
        "SELL" | "SHORT" => Ok(Direction::Sell),
        other => Err(GatewayError::Data(format!("unknown position side {other:?}"))),
    }
}

/// Build the canonical series from wire klines, oldest first
fn parse_klines(
    symbol: &str,
    interval: &str,
    data: KlinesData,
) -> Result<CandleSeries, GatewayError> {
    let mut candles = Vec::with_capacity(data.klines.len());
    for entry in &data.klines {
        let open_time = Utc
            .timestamp_millis_opt(entry.time)
            .single()
            .ok_or_else(|| GatewayError::Data(format!("invalid kline time {}", entry.time)))?;
        candles.push(Candle {
            open_time,
            open: parse_f64(&entry.open, "kline.open")?,
            high: parse_f64(&entry.high, "kline.high")?,
            low: parse_f64(&entry.low, "kline.low")?,
            close: parse_f64(&entry.close, "kline.close")?,
            volume: parse_f64(&entry.volume, "kline.volume")?,
        });
    }
    candles.sort_by_key(|c| c.open_time);
    Ok(CandleSeries::from_candles(symbol, interval, candles))
}

fn parse_ticker(data: TickerData) -> Result<TickerSnapshot, GatewayError> {
    let timestamp = Utc
        .timestamp_millis_opt(data.time)
        .single()
        .ok_or_else(|| GatewayError::Data(format!("invalid ticker time {}", data.time)))?;
    Ok(TickerSnapshot::new(
        &data.symbol,
        parse_f64(&data.open, "ticker.open")?,
        parse_f64(&data.high, "ticker.high")?,
        parse_f64(&data.low, "ticker.low")?,
        parse_f64(&data.close, "ticker.close")?,
        parse_f64(&data.volume, "ticker.volume")?,
        parse_f64(&data.amount, "ticker.amount")?,
        data.count,
        timestamp,
    ))
}
