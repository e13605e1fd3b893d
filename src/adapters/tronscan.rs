//! Tronscan decoder (`token_asset_overview`).
//!
//! The body lists the account's assets under `data`. The TRX record is
//! preferred when records are tagged with `tokenAbbr`; otherwise the
//! first record is used. Balances are in sun (10^-6 TRX) and may arrive
//! as strings or numbers.

use rust_decimal::Decimal;
use serde::Deserialize;

use super::{scale_amount, ProbeError, ProbeOutcome};

#[derive(Debug, Deserialize)]
struct AssetOverview {
    #[serde(default)]
    data: Option<Vec<AssetRecord>>,
}

#[derive(Debug, Deserialize)]
struct AssetRecord {
    #[serde(rename = "tokenAbbr", default)]
    token_abbr: Option<String>,
    #[serde(default)]
    balance: serde_json::Value,
}

pub fn decode(body: &[u8], decimals: u32) -> Result<ProbeOutcome, ProbeError> {
    let overview: AssetOverview = serde_json::from_slice(body)
        .map_err(|e| ProbeError::MalformedResponse(e.to_string()))?;

    let records = overview.data.unwrap_or_default();
    let record = records
        .iter()
        .find(|r| r.token_abbr.as_deref().is_some_and(|a| a.eq_ignore_ascii_case("trx")))
        .or_else(|| records.first());

    let Some(record) = record else {
        return Ok(ProbeOutcome::NoBalance);
    };

    let balance = scale_amount(&record.balance, decimals)?;
    if balance > Decimal::ZERO {
        Ok(ProbeOutcome::Balance(balance))
    } else {
        Ok(ProbeOutcome::NoBalance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_first_record_balance() {
        let body = br#"{"totalAssetInTrx":1.5,"data":[{"balance":"1500000"}]}"#;
        assert_eq!(
            decode(body, 6).unwrap(),
            ProbeOutcome::Balance(Decimal::from_str("1.5").unwrap())
        );
    }

    #[test]
    fn test_trx_record_preferred_over_first() {
        let body = br#"{"data":[
            {"tokenAbbr":"USDT","balance":"99000000"},
            {"tokenAbbr":"trx","balance":250000}
        ]}"#;
        assert_eq!(
            decode(body, 6).unwrap(),
            ProbeOutcome::Balance(Decimal::from_str("0.25").unwrap())
        );
    }

    #[test]
    fn test_empty_or_missing_data_is_no_balance() {
        assert_eq!(decode(br#"{"data":[]}"#, 6).unwrap(), ProbeOutcome::NoBalance);
        assert_eq!(decode(br#"{}"#, 6).unwrap(), ProbeOutcome::NoBalance);
        assert_eq!(decode(br#"{"data":null}"#, 6).unwrap(), ProbeOutcome::NoBalance);
    }

    #[test]
    fn test_zero_balance_is_no_balance() {
        let body = br#"{"data":[{"tokenAbbr":"trx","balance":"0"}]}"#;
        assert_eq!(decode(body, 6).unwrap(), ProbeOutcome::NoBalance);
    }

    #[test]
    fn test_non_json_is_malformed() {
        assert!(matches!(decode(b"nope", 6), Err(ProbeError::MalformedResponse(_))));
    }
}
