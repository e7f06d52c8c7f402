// Lightweight DEX aggregator client: plain HTTP + serde, no SDK types.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{as_base, decode_json, Route, TradeRouter};
use crate::swap::types::{Amount, ContractCall};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    route_id: String,
    amount_out: Amount,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildRequest<'a> {
    route_id: &'a str,
    token_in: Address,
    token_out: Address,
    amount_in: Amount,
    taker: Address,
    /// Fraction, e.g. "0.005" for 50 bps.
    slippage: String,
}

#[derive(Debug, Deserialize)]
struct BuildResponse {
    calls: Vec<ContractCall>,
}

/// Basis points → fraction, exact.
pub fn slippage_fraction(bps: u32) -> Decimal {
    (Decimal::from(bps) / dec!(10000)).normalize()
}

pub struct AggregatorClient {
    client: reqwest::Client,
    base_url: Url,
}

impl AggregatorClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: as_base(base_url),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid aggregator endpoint {}", path))
    }
}

#[async_trait]
impl TradeRouter for AggregatorClient {
    async fn best_route(&self, token_in: Address, token_out: Address, amount: Amount) -> Result<Route> {
        let url = self.endpoint("quote")?;
        let resp = self
            .client
            .get(url)
            .query(&[
                ("tokenIn", token_in.to_string()),
                ("tokenOut", token_out.to_string()),
                ("amount", amount.to_string()),
            ])
            .send()
            .await
            .context("Failed to request aggregator quote")?;
        let quote: QuoteResponse = decode_json(resp, "aggregator quote").await?;
        debug!("📈 Quote {} → {}: {} out (route {})", token_in, token_out, quote.amount_out, quote.route_id);

        Ok(Route {
            route_id: quote.route_id,
            token_in,
            token_out,
            amount_in: amount,
            quoted_out: quote.amount_out,
        })
    }

    async fn build_calls(&self, route: &Route, taker: Address, slippage_bps: u32) -> Result<Vec<ContractCall>> {
        let body = BuildRequest {
            route_id: &route.route_id,
            token_in: route.token_in,
            token_out: route.token_out,
            amount_in: route.amount_in,
            taker,
            slippage: slippage_fraction(slippage_bps).to_string(),
        };
        let resp = self
            .client
            .post(self.endpoint("build")?)
            .json(&body)
            .send()
            .await
            .context("Failed to request aggregator build")?;
        let built: BuildResponse = decode_json(resp, "aggregator build").await?;
        Ok(built.calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slippage_fraction_is_exact() {
        assert_eq!(slippage_fraction(50).to_string(), "0.005");
        assert_eq!(slippage_fraction(1).to_string(), "0.0001");
        assert_eq!(slippage_fraction(10_000).to_string(), "1");
        assert_eq!(slippage_fraction(0).to_string(), "0");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let c = AggregatorClient::new("https://agg.example/api/v1".parse().unwrap());
        assert_eq!(c.endpoint("quote").unwrap().as_str(), "https://agg.example/api/v1/quote");
        let c = AggregatorClient::new("https://agg.example/".parse().unwrap());
        assert_eq!(c.endpoint("build").unwrap().as_str(), "https://agg.example/build");
    }

    #[test]
    fn test_build_request_shape() {
        let body = BuildRequest {
            route_id: "r-9",
            token_in: Address::repeat_byte(2),
            token_out: Address::repeat_byte(3),
            amount_in: Amount::from(1000),
            taker: Address::repeat_byte(9),
            slippage: slippage_fraction(50).to_string(),
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["routeId"], "r-9");
        assert_eq!(v["amountIn"], "1000");
        assert_eq!(v["slippage"], "0.005");
        assert!(v.get("taker").is_some());
    }

    #[test]
    fn test_parse_quote_and_calls() {
        let q: QuoteResponse =
            serde_json::from_str(r#"{"routeId":"r-1","amountOut":"115792089237316195423570985008687907853269984665640564039457584007913129639935"}"#)
                .unwrap();
        assert_eq!(q.route_id, "r-1");
        assert_eq!(q.amount_out.as_u256(), alloy_primitives::U256::MAX);

        let b: BuildResponse = serde_json::from_str(
            r#"{"calls":[{"to":"0x0303030303030303030303030303030303030303","data":"0xabcd","value":"0x0"},
                         {"to":"0x0404040404040404040404040404040404040404"}]}"#,
        )
        .unwrap();
        assert_eq!(b.calls.len(), 2);
        assert_eq!(b.calls[0].data.as_ref(), &[0xab, 0xcd]);
        assert!(b.calls[1].data.is_empty());
    }
}
