//! Explorer adapters — one balance query against one network's API.
//!
//! The dispatcher only sees the `Prober` trait. `ExplorerClient` is the
//! real implementation: it builds the network-specific request from the
//! registry, sends it over the shared connection pool, and hands a 200
//! body to the network's `ResponseDecoder`. Probers never retry; retry
//! policy belongs to the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Semaphore;

use crate::pool::registry::{self, KeyPlacement};
use crate::pool::Credential;

pub mod etherscan;
pub mod tronscan;

// ── Core Types ──────────────────────────────────────────────────────

/// Normalized result of a successful balance query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Positive native-token balance, already scaled to whole units
    Balance(Decimal),
    NoBalance,
}

/// Why a probe produced no answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// HTTP 429, or the explorer's in-body "rate limit reached" answer
    #[error("rate limited by explorer")]
    RateLimited,
    /// Timeout, connection failure, or a non-200 status
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("unsupported network '{0}'")]
    UnsupportedNetwork(String),
}

/// Anything that can answer "does this address hold a balance?".
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(
        &self,
        network: &str,
        address: &str,
        credential: &Credential,
    ) -> Result<ProbeOutcome, ProbeError>;
}

// ── Response Decoders ───────────────────────────────────────────────

/// Closed set of explorer response shapes. Adding a network with a new
/// shape means adding a variant and its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDecoder {
    /// `{status, message, result}` with `result` in the smallest unit
    Etherscan,
    /// `{data: [{tokenAbbr, balance}, ...]}`
    Tronscan,
}

impl ResponseDecoder {
    /// Extract the balance from a 200 response body.
    pub fn decode(&self, body: &[u8], decimals: u32) -> Result<ProbeOutcome, ProbeError> {
        match self {
            ResponseDecoder::Etherscan => etherscan::decode(body, decimals),
            ResponseDecoder::Tronscan => tronscan::decode(body, decimals),
        }
    }
}

/// Turn an integer amount in the smallest unit into whole tokens.
///
/// Accepts a JSON string or number. Amounts wider than 28 significant
/// digits are rejected.
pub fn scale_amount(raw: &serde_json::Value, decimals: u32) -> Result<Decimal, ProbeError> {
    let text = match raw {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null => return Ok(Decimal::ZERO),
        other => {
            return Err(ProbeError::MalformedResponse(format!(
                "amount is not numeric: {}",
                other
            )))
        }
    };

    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProbeError::MalformedResponse(format!(
            "amount is not an unsigned integer: {}",
            text.chars().take(80).collect::<String>()
        )));
    }

    let digits = text.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(Decimal::ZERO);
    }

    // Decimal holds 28 significant digits; no real balance comes close.
    const MAX_DIGITS: usize = 28;
    if digits.len() > MAX_DIGITS {
        return Err(ProbeError::MalformedResponse(format!(
            "amount out of range ({} digits)",
            digits.len()
        )));
    }
    let mantissa: i128 = digits
        .parse()
        .map_err(|e| ProbeError::MalformedResponse(format!("amount: {}", e)))?;

    Decimal::try_from_i128_with_scale(mantissa, decimals)
        .map(|d| d.normalize())
        .map_err(|e| ProbeError::MalformedResponse(format!("amount: {}", e)))
}

// ── Explorer Client ─────────────────────────────────────────────────

/// Transport settings shared by every probe of a process.
#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_connections: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_connections: 100,
        }
    }
}

/// `Prober` backed by the public explorer REST APIs.
pub struct ExplorerClient {
    client: reqwest::Client,
    /// Caps in-flight requests across every network
    permits: Arc<Semaphore>,
}

impl ExplorerClient {
    pub fn new(settings: HttpSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .pool_max_idle_per_host(settings.max_connections)
            .user_agent(concat!("chainprobe/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(settings.max_connections.max(1))),
        })
    }

    fn build_request(
        &self,
        spec: &registry::NetworkSpec,
        address: &str,
        credential: &Credential,
    ) -> reqwest::RequestBuilder {
        let mut query: Vec<(&str, &str)> = spec.fixed_params.to_vec();
        query.push(("address", address));

        let mut request = self.client.get(spec.base_url);
        match spec.key_placement {
            KeyPlacement::Query(name) => query.push((name, credential.secret())),
            KeyPlacement::Header(name) => {
                request = request.header(http::HeaderName::from_static(name), credential.secret());
            }
        }
        request.query(&query)
    }
}

#[async_trait]
impl Prober for ExplorerClient {
    async fn probe(
        &self,
        network: &str,
        address: &str,
        credential: &Credential,
    ) -> Result<ProbeOutcome, ProbeError> {
        let spec = registry::get_network(network)
            .ok_or_else(|| ProbeError::UnsupportedNetwork(network.to_string()))?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        // reqwest errors can echo the full URL, which carries the key.
        let resp = self
            .build_request(spec, address, credential)
            .send()
            .await
            .map_err(|e| ProbeError::Transport(describe(e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProbeError::RateLimited);
        }
        if status != reqwest::StatusCode::OK {
            return Err(ProbeError::Transport(format!("HTTP {}", status.as_u16())));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| ProbeError::Transport(describe(e)))?;
        spec.decoder.decode(&body, spec.decimals)
    }
}

/// Describe a transport failure without the request URL.
fn describe(e: reqwest::Error) -> String {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_body() || e.is_decode() {
        "body"
    } else {
        "request"
    };
    format!("{}: {}", kind, e.without_url())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_scale_wei_string() {
        let v = scale_amount(&json!("1500000000000000000"), 18).unwrap();
        assert_eq!(v, Decimal::from_str("1.5").unwrap());
    }

    #[test]
    fn test_scale_sun_number() {
        let v = scale_amount(&json!(2_500_000u64), 6).unwrap();
        assert_eq!(v, Decimal::from_str("2.5").unwrap());
    }

    #[test]
    fn test_scale_zero_and_null() {
        assert_eq!(scale_amount(&json!("0"), 18).unwrap(), Decimal::ZERO);
        assert_eq!(scale_amount(&json!("000"), 18).unwrap(), Decimal::ZERO);
        assert_eq!(scale_amount(&serde_json::Value::Null, 18).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_scale_rejects_non_integers() {
        assert!(scale_amount(&json!("-5"), 18).is_err());
        assert!(scale_amount(&json!("1.5"), 18).is_err());
        assert!(scale_amount(&json!("Error! Invalid address format"), 18).is_err());
        assert!(scale_amount(&json!(true), 18).is_err());
    }

    #[test]
    fn test_scale_rejects_amounts_wider_than_decimal() {
        // 28 digits still fit
        let raw = format!("1{}", "0".repeat(27));
        let v = scale_amount(&json!(raw), 18).unwrap();
        assert_eq!(v, Decimal::from_str("1000000000").unwrap());

        let raw = format!("123456789{}", "0".repeat(30));
        assert!(matches!(
            scale_amount(&json!(raw), 18),
            Err(ProbeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_scale_non_ascii_amount_is_malformed_not_a_panic() {
        let raw = format!("{}é", "a".repeat(79));
        match scale_amount(&json!(raw), 18) {
            Err(ProbeError::MalformedResponse(msg)) => assert!(msg.ends_with("é")),
            other => panic!("unexpected {:?}", other),
        }

        let raw = format!("{}€", "9".repeat(79));
        assert!(matches!(
            scale_amount(&json!(raw), 6),
            Err(ProbeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_decoders_survive_multibyte_amounts() {
        let eth = format!(r#"{{"status":"1","message":"OK","result":"{}é"}}"#, "a".repeat(79));
        assert!(matches!(
            ResponseDecoder::Etherscan.decode(eth.as_bytes(), 18),
            Err(ProbeError::MalformedResponse(_))
        ));
        let trx = format!(r#"{{"data":[{{"balance":"{}€"}}]}}"#, "9".repeat(79));
        assert!(matches!(
            ResponseDecoder::Tronscan.decode(trx.as_bytes(), 6),
            Err(ProbeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_decoder_dispatch_by_variant() {
        let eth = br#"{"status":"1","message":"OK","result":"1000000000000000000"}"#;
        assert_eq!(
            ResponseDecoder::Etherscan.decode(eth, 18).unwrap(),
            ProbeOutcome::Balance(Decimal::ONE)
        );
        let trx = br#"{"data":[{"tokenAbbr":"trx","balance":"1000000"}]}"#;
        assert_eq!(
            ResponseDecoder::Tronscan.decode(trx, 6).unwrap(),
            ProbeOutcome::Balance(Decimal::ONE)
        );
    }

    #[test]
    fn test_query_key_goes_into_url_and_header_key_into_headers() {
        let client = ExplorerClient::new(HttpSettings::default()).unwrap();
        let cred = Credential::new("K3Y");

        let eth = registry::get_network("ethereum").unwrap();
        let req = client.build_request(eth, "0xabc", &cred).build().unwrap();
        let url = req.url().as_str();
        assert!(url.starts_with("https://api.etherscan.io/api?"));
        assert!(url.contains("module=account"));
        assert!(url.contains("action=balance"));
        assert!(url.contains("address=0xabc"));
        assert!(url.contains("apikey=K3Y"));

        let tron = registry::get_network("tron").unwrap();
        let req = client.build_request(tron, "TXyz", &cred).build().unwrap();
        assert!(req.url().as_str().ends_with("token_asset_overview?address=TXyz"));
        assert_eq!(req.headers().get("tron-pro-api-key").unwrap(), "K3Y");
    }

    #[tokio::test]
    async fn test_unknown_network_is_rejected_before_any_request() {
        let client = ExplorerClient::new(HttpSettings::default()).unwrap();
        let err = client
            .probe("dogecoin", "D123", &Credential::new("k"))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::UnsupportedNetwork("dogecoin".into()));
    }
}
