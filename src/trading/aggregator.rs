//! Swap aggregator HTTP client
//!
//! Quote and swap-build against a Jupiter-style aggregator API. Each call
//! retries transient failures with exponential backoff; 4xx and malformed
//! bodies are permanent.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backoff::{future::retry, ExponentialBackoff};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::AggregatorConfig;
use crate::error::{Error, Result};

/// Priority fee forwarded to the swap-build endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum PriorityFee {
    /// Let the aggregator pick; forwarded as the literal string "auto"
    Auto,
    Lamports(u64),
}

/// A swap quote. The raw response is kept verbatim because the swap-build
/// endpoint expects it echoed back unchanged.
#[derive(Debug, Clone)]
pub struct Quote {
    pub in_amount: u64,
    pub out_amount: u64,
    pub raw: Value,
}

/// Aggregator API client over the shared HTTP client
pub struct AggregatorClient {
    config: AggregatorConfig,
    http: reqwest::Client,
}

impl AggregatorClient {
    pub fn new(config: AggregatorConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    /// Fetch a swap quote. Retries up to `retry_attempts` times with
    /// exponential backoff on transient failures.
    pub async fn get_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount_atomic: u64,
        slippage_bps: u32,
        compute_unit_price_micro_lamports: Option<u64>,
    ) -> Result<Quote> {
        let url = format!("{}/quote", self.config.base_url);
        let mut params = vec![
            ("inputMint".to_string(), input_mint.to_string()),
            ("outputMint".to_string(), output_mint.to_string()),
            ("amount".to_string(), amount_atomic.to_string()),
            ("slippageBps".to_string(), slippage_bps.to_string()),
            ("asLegacyTransaction".to_string(), "false".to_string()),
        ];
        if let Some(price) = compute_unit_price_micro_lamports {
            params.push((
                "computeUnitPriceMicroLamports".to_string(),
                price.to_string(),
            ));
        }

        info!(
            input = input_mint,
            output = output_mint,
            amount = amount_atomic,
            slippage_bps,
            "fetching swap quote"
        );

        let body = self
            .request_with_retry(|| async {
                let response = self
                    .http
                    .get(&url)
                    .query(&params)
                    .timeout(Duration::from_secs(self.config.http_timeout_secs))
                    .send()
                    .await
                    .map_err(|e| Error::AggregatorRequest(e.to_string()))?;
                read_json(response).await
            })
            .await?;

        let quote = parse_quote(body)?;
        debug!(
            in_amount = quote.in_amount,
            out_amount = quote.out_amount,
            "received quote"
        );
        Ok(quote)
    }

    /// Post the quote to the swap-build endpoint and return the
    /// base64-encoded versioned transaction.
    pub async fn build_swap(
        &self,
        quote: &Quote,
        user_public_key: &str,
        priority_fee: Option<&PriorityFee>,
        compute_unit_price_micro_lamports: Option<u64>,
    ) -> Result<String> {
        let url = format!("{}/swap", self.config.base_url);
        let payload = build_swap_payload(
            quote,
            user_public_key,
            priority_fee,
            compute_unit_price_micro_lamports,
        );

        info!(user = user_public_key, "requesting swap transaction");

        let body = self
            .request_with_retry(|| async {
                let response = self
                    .http
                    .post(&url)
                    .json(&payload)
                    .timeout(Duration::from_secs(self.config.http_timeout_secs))
                    .send()
                    .await
                    .map_err(|e| Error::AggregatorRequest(e.to_string()))?;
                read_json(response).await
            })
            .await?;

        body.get("swapTransaction")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::InvalidSwapResponse("missing swapTransaction in response".to_string())
            })
    }

    /// Bounded retry: transient errors are retried with exponential backoff
    /// until the attempt budget is spent, then surfaced as permanent.
    async fn request_with_retry<F, Fut>(&self, op: F) -> Result<Value>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Value>>,
    {
        let attempts = AtomicU32::new(0);
        let max_attempts = self.config.retry_attempts.max(1);
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.retry_base_delay_ms),
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        retry(policy, || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match op().await {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(attempt, max_attempts, "transient aggregator error: {e}");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => {
                    error!(attempt, "aggregator request failed: {e}");
                    Err(backoff::Error::permanent(e))
                }
            }
        })
        .await
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::AggregatorStatus {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| Error::AggregatorRequest(format!("body decode failed: {e}")))
}

/// Parse and validate a quote body. `outAmount` is required.
fn parse_quote(body: Value) -> Result<Quote> {
    let out_amount = amount_field(&body, "outAmount")
        .ok_or_else(|| Error::InvalidQuote("missing outAmount".to_string()))?;
    let in_amount = amount_field(&body, "inAmount").unwrap_or(0);
    Ok(Quote {
        in_amount,
        out_amount,
        raw: body,
    })
}

// Aggregator amounts arrive as decimal strings
fn amount_field(body: &Value, key: &str) -> Option<u64> {
    match body.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn build_swap_payload(
    quote: &Quote,
    user_public_key: &str,
    priority_fee: Option<&PriorityFee>,
    compute_unit_price_micro_lamports: Option<u64>,
) -> Value {
    let mut payload = json!({
        "quoteResponse": quote.raw,
        "userPublicKey": user_public_key,
        "wrapAndUnwrapSol": true,
        "asLegacyTransaction": false,
    });

    match priority_fee {
        Some(PriorityFee::Auto) => {
            payload["prioritizationFeeLamports"] = json!("auto");
        }
        Some(PriorityFee::Lamports(lamports)) => {
            payload["prioritizationFeeLamports"] = json!(lamports);
        }
        None => {
            if let Some(price) = compute_unit_price_micro_lamports {
                payload["computeUnitPriceMicroLamports"] = json!(price);
            }
        }
    }

    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote_body(out_amount: &str) -> Value {
        json!({
            "inAmount": "1000000000",
            "outAmount": out_amount,
            "routePlan": []
        })
    }

    #[test]
    fn test_parse_quote_string_amounts() {
        let quote = parse_quote(quote_body("12345")).unwrap();
        assert_eq!(quote.out_amount, 12345);
        assert_eq!(quote.in_amount, 1_000_000_000);
    }

    #[test]
    fn test_parse_quote_missing_out_amount() {
        let err = parse_quote(json!({"inAmount": "1"})).unwrap_err();
        assert!(matches!(err, Error::InvalidQuote(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_swap_payload_auto_priority_fee() {
        let quote = parse_quote(quote_body("1000")).unwrap();
        let payload = build_swap_payload(&quote, "UserPubkey", Some(&PriorityFee::Auto), Some(500));

        // "auto" is forwarded verbatim and wins over the compute unit price
        assert_eq!(payload["prioritizationFeeLamports"], json!("auto"));
        assert!(payload.get("computeUnitPriceMicroLamports").is_none());
        assert_eq!(payload["wrapAndUnwrapSol"], json!(true));
        assert_eq!(payload["asLegacyTransaction"], json!(false));
    }

    #[test]
    fn test_swap_payload_explicit_lamports() {
        let quote = parse_quote(quote_body("1000")).unwrap();
        let payload =
            build_swap_payload(&quote, "UserPubkey", Some(&PriorityFee::Lamports(10_000)), None);
        assert_eq!(payload["prioritizationFeeLamports"], json!(10_000));
    }

    #[test]
    fn test_swap_payload_compute_unit_fallback() {
        let quote = parse_quote(quote_body("1000")).unwrap();
        let payload = build_swap_payload(&quote, "UserPubkey", None, Some(500));
        assert_eq!(payload["computeUnitPriceMicroLamports"], json!(500));
        assert!(payload.get("prioritizationFeeLamports").is_none());
    }

    #[test]
    fn test_swap_payload_echoes_quote() {
        let quote = parse_quote(quote_body("1000")).unwrap();
        let payload = build_swap_payload(&quote, "UserPubkey", None, None);
        assert_eq!(payload["quoteResponse"], quote.raw);
    }
}
