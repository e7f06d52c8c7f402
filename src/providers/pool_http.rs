// Privacy pool sidecar client. The sidecar owns the protocol's secret
// material; this side only forwards it back when withdrawing.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{as_base, decode_json, PoolDeposit, PrivacyPool};
use crate::swap::types::{Amount, ContractCall, PrivacyData};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DepositRequest {
    token: Address,
    amount: Amount,
    beneficiary: Address,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawRequest<'a> {
    deposit_ref: &'a str,
    amount: Amount,
    privacy_data: &'a PrivacyData,
    recipient: Address,
}

#[derive(Debug, Deserialize)]
struct WithdrawResponse {
    calls: Vec<ContractCall>,
}

pub struct PoolSidecarClient {
    client: reqwest::Client,
    base_url: Url,
}

impl PoolSidecarClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: as_base(base_url),
        }
    }

    async fn post<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("Invalid pool endpoint {}", path))?;
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to request pool /{}", path))?;
        decode_json(resp, &format!("pool /{}", path)).await
    }
}

#[async_trait]
impl PrivacyPool for PoolSidecarClient {
    async fn deposit(&self, token: Address, amount: Amount, beneficiary: Address) -> Result<PoolDeposit> {
        let body = DepositRequest { token, amount, beneficiary };
        let deposit: PoolDeposit = self.post("deposit", &body).await?;
        debug!("🔐 Pool deposit for {}: {} call(s)", beneficiary, deposit.calls.len());
        Ok(deposit)
    }

    async fn withdraw(
        &self,
        deposit_ref: &str,
        amount: Amount,
        privacy_data: &PrivacyData,
        recipient: Address,
    ) -> Result<Vec<ContractCall>> {
        let body = WithdrawRequest {
            deposit_ref,
            amount,
            privacy_data,
            recipient,
        };
        let resp: WithdrawResponse = self.post("withdraw", &body).await?;
        Ok(resp.calls)
    }
}
