//! External capability providers consumed by the phase executor.
//!
//! The engine never looks inside these: the privacy pool hands out calls and
//! opaque secret material, the aggregator hands out routes and calls, and the
//! wallet signs and submits whatever it is given.

pub mod aggregator_http;
pub mod pool_http;
pub mod wallet;

use alloy_primitives::Address;
use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::swap::types::{Amount, ContractCall, PrivacyData};

/// `Url::join` drops the last path segment unless the base ends in `/`.
pub(crate) fn as_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

pub(crate) async fn decode_json<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> anyhow::Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("{} returned status {}: {}", what, status, body.trim());
    }
    resp.json()
        .await
        .with_context(|| format!("Failed to parse {} response", what))
}

/// The calls were mined and reverted, so none of their effects persisted.
/// Wallets return it from `await_finality` wrapped in `anyhow::Error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{tx_ref} reverted")]
pub struct Reverted {
    pub tx_ref: String,
}

/// Deposit calls plus the secret material they will create on-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolDeposit {
    pub calls: Vec<ContractCall>,
    pub privacy_data: PrivacyData,
}

/// Best route returned by the aggregator. `quoted_out` is an estimate only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub route_id: String,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: Amount,
    pub quoted_out: Amount,
}

#[async_trait]
pub trait PrivacyPool: Send + Sync {
    /// Calls that deposit `amount` of `token` credited to `beneficiary`.
    async fn deposit(
        &self,
        token: Address,
        amount: Amount,
        beneficiary: Address,
    ) -> anyhow::Result<PoolDeposit>;

    /// Calls that release `amount` from a deposit to `recipient`.
    async fn withdraw(
        &self,
        deposit_ref: &str,
        amount: Amount,
        privacy_data: &PrivacyData,
        recipient: Address,
    ) -> anyhow::Result<Vec<ContractCall>>;
}

#[async_trait]
pub trait TradeRouter: Send + Sync {
    async fn best_route(
        &self,
        token_in: Address,
        token_out: Address,
        amount: Amount,
    ) -> anyhow::Result<Route>;

    async fn build_calls(
        &self,
        route: &Route,
        taker: Address,
        slippage_bps: u32,
    ) -> anyhow::Result<Vec<ContractCall>>;
}

/// The single custodial signer. Calls are submitted strictly in order.
#[async_trait]
pub trait WalletGateway: Send + Sync {
    fn address(&self) -> Address;

    /// Paper mode: references are fabricated and balances are not real.
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Signs and submits `calls` in order; returns the reference of the last
    /// one as soon as it is broadcast. An `Err` means the last call never
    /// left the wallet.
    async fn submit(&self, calls: &[ContractCall]) -> anyhow::Result<String>;

    /// Waits until `tx_ref` is final. Fails with [`Reverted`] if it was mined
    /// but reverted; any other error leaves its outcome open.
    async fn await_finality(&self, tx_ref: &str) -> anyhow::Result<()>;

    async fn token_balance(&self, token: Address, owner: Address) -> anyhow::Result<Amount>;
}
