//! Request signing
//!
//! The canonical signing string is `UPPERCASE(method) + path + "?" + query`,
//! where the query is every parameter (timestamp included) sorted by key and
//! joined as `k=v` pairs with `&`. The signature is the hex-encoded
//! HMAC-SHA256 of that string. The timestamp is part of the signed payload,
//! so a signature is never valid for a different instant and is never reused
//! across calls.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// Sorted `k=v&k=v` query over all parameters.
///
/// A `BTreeMap` keeps keys ordered, so the output is canonical by
/// construction.
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Full signing payload: method, path and canonical query
pub fn signing_payload(method: &str, path: &str, query: &str) -> String {
    if query.is_empty() {
        format!("{}{}", method.to_uppercase(), path)
    } else {
        format!("{}{}?{}", method.to_uppercase(), path, query)
    }
}

/// Hex-encoded HMAC-SHA256 signature over the canonical payload.
///
/// `params` must already contain the timestamp the request will carry.
pub fn sign_request(
    secret: &str,
    method: &str,
    path: &str,
    params: &BTreeMap<String, String>,
) -> String {
    let payload = signing_payload(method, path, &canonical_query(params));
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_query_is_sorted_by_key() {
        let p = params(&[
            ("symbol", "BTC_USDT_PERP"),
            ("interval", "60M"),
            ("timestamp", "1700000000000"),
            ("limit", "220"),
        ]);
        assert_eq!(
            canonical_query(&p),
            "interval=60M&limit=220&symbol=BTC_USDT_PERP&timestamp=1700000000000"
        );
    }

    #[test]
    fn test_payload_shape() {
        let p = params(&[("timestamp", "1700000000000")]);
        assert_eq!(
            signing_payload("get", "/api/v1/market/klines", &canonical_query(&p)),
            "GET/api/v1/market/klines?timestamp=1700000000000"
        );
    }

    #[test]
    fn test_signature_is_deterministic() {
        let p = params(&[("symbol", "BTC_USDT_PERP"), ("timestamp", "1700000000000")]);
        let a = sign_request("secret", "GET", "/api/v1/market/klines", &p);
        let b = sign_request("secret", "GET", "/api/v1/market/klines", &p);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_any_input_change_flips_signature() {
        let p = params(&[("symbol", "BTC_USDT_PERP"), ("timestamp", "1700000000000")]);
        let base = sign_request("secret", "GET", "/api/v1/order", &p);

        // One character of the path
        assert_ne!(base, sign_request("secret", "GET", "/api/v1/orders", &p));
        // Method
        assert_ne!(base, sign_request("secret", "POST", "/api/v1/order", &p));
        // Secret
        assert_ne!(base, sign_request("secre7", "GET", "/api/v1/order", &p));
        // Timestamp
        let p2 = params(&[("symbol", "BTC_USDT_PERP"), ("timestamp", "1700000000001")]);
        assert_ne!(base, sign_request("secret", "GET", "/api/v1/order", &p2));
        // Parameter value
        let p3 = params(&[("symbol", "ETH_USDT_PERP"), ("timestamp", "1700000000000")]);
        assert_ne!(base, sign_request("secret", "GET", "/api/v1/order", &p3));
    }

    #[test]
    fn test_method_is_uppercased_into_payload() {
        let p = params(&[("timestamp", "1")]);
        assert_eq!(
            sign_request("s", "post", "/api/v1/order", &p),
            sign_request("s", "POST", "/api/v1/order", &p)
        );
    }
}
