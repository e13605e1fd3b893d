//! Etherscan-family decoder (Etherscan, BscScan, PolygonScan).
//!
//! These explorers answer `{status, message, result}`. `status == "1"`
//! means success and `result` holds the balance in wei as a decimal
//! string. Throttled calls come back as HTTP 200 with `status == "0"`
//! and a "Max rate limit reached" message rather than a 429.

use rust_decimal::Decimal;
use serde::Deserialize;

use super::{scale_amount, ProbeError, ProbeOutcome};

#[derive(Debug, Deserialize)]
struct BalanceEnvelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

pub fn decode(body: &[u8], decimals: u32) -> Result<ProbeOutcome, ProbeError> {
    let envelope: BalanceEnvelope = serde_json::from_slice(body)
        .map_err(|e| ProbeError::MalformedResponse(e.to_string()))?;

    if envelope.status != "1" {
        if mentions_rate_limit(&envelope.message) || mentions_rate_limit(&envelope.result.to_string()) {
            return Err(ProbeError::RateLimited);
        }
        return Ok(ProbeOutcome::NoBalance);
    }

    let balance = scale_amount(&envelope.result, decimals)?;
    if balance > Decimal::ZERO {
        Ok(ProbeOutcome::Balance(balance))
    } else {
        Ok(ProbeOutcome::NoBalance)
    }
}

fn mentions_rate_limit(text: &str) -> bool {
    text.to_ascii_lowercase().contains("rate limit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_positive_balance() {
        let body = br#"{"status":"1","message":"OK","result":"40891626854930000000"}"#;
        assert_eq!(
            decode(body, 18).unwrap(),
            ProbeOutcome::Balance(Decimal::from_str("40.89162685493").unwrap())
        );
    }

    #[test]
    fn test_zero_balance_is_no_balance() {
        let body = br#"{"status":"1","message":"OK","result":"0"}"#;
        assert_eq!(decode(body, 18).unwrap(), ProbeOutcome::NoBalance);
    }

    #[test]
    fn test_non_success_status_is_no_balance() {
        let body = br#"{"status":"0","message":"NOTOK","result":"Error! Invalid address format"}"#;
        assert_eq!(decode(body, 18).unwrap(), ProbeOutcome::NoBalance);
    }

    #[test]
    fn test_in_body_rate_limit_is_rate_limited() {
        let body = br#"{"status":"0","message":"NOTOK","result":"Max rate limit reached"}"#;
        assert_eq!(decode(body, 18).unwrap_err(), ProbeError::RateLimited);
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            decode(b"<html>502 Bad Gateway</html>", 18),
            Err(ProbeError::MalformedResponse(_))
        ));
        assert!(matches!(
            decode(br#"{"status":"1","message":"OK","result":"abc"}"#, 18),
            Err(ProbeError::MalformedResponse(_))
        ));
    }
}
