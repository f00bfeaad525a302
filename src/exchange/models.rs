//! Wire types for the exchange REST API
//!
//! The exchange envelopes every response in `{result, code, message, data}`
//! and sends decimal values as strings; parsing to `f64` happens at the
//! client boundary so the rest of the engine only sees canonical types.

use serde::Deserialize;

/// Response envelope shared by every endpoint
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub result: bool,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

/// Kline endpoint payload
#[derive(Debug, Deserialize)]
pub struct KlinesData {
    pub klines: Vec<KlineEntry>,
}

#[derive(Debug, Deserialize)]
pub struct KlineEntry {
    /// Open time, milliseconds since epoch
    pub time: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
}

/// 24h ticker endpoint payload
#[derive(Debug, Deserialize)]
pub struct TickerData {
    pub symbol: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    /// 24h quote turnover
    pub amount: String,
    /// 24h trade count
    pub count: u64,
    /// Snapshot time, milliseconds since epoch
    pub time: i64,
}

/// Balance endpoint payload
#[derive(Debug, Deserialize)]
pub struct BalancesData {
    pub balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceEntry {
    pub coin: String,
    pub free: String,
    pub frozen: String,
}

/// Order placement payload
#[derive(Debug, Deserialize)]
pub struct OrderData {
    #[serde(rename = "orderId")]
    pub order_id: u64,
}

/// Open positions endpoint payload
#[derive(Debug, Deserialize)]
pub struct PositionsData {
    pub positions: Vec<PositionEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PositionEntry {
    pub symbol: String,
    pub side: String,
    pub size: String,
    #[serde(rename = "entryPrice")]
    pub entry_price: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_with_data() {
        let raw = r#"{"result": true, "data": {"orderId": 42}}"#;
        let parsed: ApiResponse<OrderData> = serde_json::from_str(raw).unwrap();
        assert!(parsed.result);
        assert_eq!(parsed.data.unwrap().order_id, 42);
    }

    #[test]
    fn test_envelope_failure_without_data() {
        let raw = r#"{"result": false, "code": "TRADE_INVALID_SIZE", "message": "size too small"}"#;
        let parsed: ApiResponse<OrderData> = serde_json::from_str(raw).unwrap();
        assert!(!parsed.result);
        assert!(parsed.data.is_none());
        assert_eq!(parsed.code.as_deref(), Some("TRADE_INVALID_SIZE"));
    }

    #[test]
    fn test_kline_entry_decimal_strings() {
        let raw = r#"{"klines": [{"time": 1700000000000, "open": "35000.1",
            "high": "35100.0", "low": "34900.5", "close": "35050.2", "volume": "123.45"}]}"#;
        let parsed: KlinesData = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.klines.len(), 1);
        assert_eq!(parsed.klines[0].close, "35050.2");
    }
}
