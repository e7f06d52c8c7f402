//! Custodial wallet gateways.
//!
//! `AlloyWallet` signs with the single intermediary key through an alloy
//! wallet-filled HTTP provider. Submissions are serialized behind a lock and
//! each call waits for its receipt before the next is sent, so the nonce
//! order always matches the call order. The last call is handed back as soon
//! as it is broadcast; its outcome is settled by `await_finality`.
//!
//! `DryRunWallet` signs nothing: references are fabricated and the executor
//! falls back to quoted amounts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::Signer;
use alloy::sol;
use alloy_primitives::{Address, B256, U256};
use alloy_signer_local::PrivateKeySigner;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::{Reverted, WalletGateway};
use crate::swap::types::{Amount, ContractCall};

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
    }
}

const RECEIPT_POLL: Duration = Duration::from_secs(2);
const FINALITY_TIMEOUT: Duration = Duration::from_secs(300);

// ─────────────────────────────────────────────────────────
// Live signer
// ─────────────────────────────────────────────────────────

pub struct AlloyWallet {
    provider: DynProvider,
    address: Address,
    confirmations: u64,
    /// One submission at a time keeps the nonce sequence gap-free.
    submit_lock: Mutex<()>,
}

impl AlloyWallet {
    pub async fn connect(
        rpc_url: &Url,
        private_key: &SecretString,
        chain_id: u64,
        confirmations: u64,
    ) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .expose_secret()
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid SWAP_PRIVATE_KEY: {}", e))?;
        let signer = signer.with_chain_id(Some(chain_id));
        let address = signer.address();

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url.clone())
            .erased();

        let remote_chain = provider
            .get_chain_id()
            .await
            .context("Failed to reach RPC")?;
        if remote_chain != chain_id {
            bail!(
                "RPC serves chain {} but SWAP_CHAIN_ID is {}",
                remote_chain,
                chain_id
            );
        }

        info!("✅ Custodial wallet {} on chain {} ({} confirmation(s))", address, chain_id, confirmations);
        Ok(Self {
            provider,
            address,
            confirmations: confirmations.max(1),
            submit_lock: Mutex::new(()),
        })
    }
}

#[async_trait]
impl WalletGateway for AlloyWallet {
    fn address(&self) -> Address {
        self.address
    }

    async fn submit(&self, calls: &[ContractCall]) -> Result<String> {
        let _guard = self.submit_lock.lock().await;
        let mut last: Option<B256> = None;

        for (i, call) in calls.iter().enumerate() {
            let tx = TransactionRequest::default()
                .with_from(self.address)
                .with_to(call.to)
                .with_input(call.data.clone())
                .with_value(call.value);
            let pending = self
                .provider
                .send_transaction(tx)
                .await
                .with_context(|| format!("Failed to send call {}/{} to {}", i + 1, calls.len(), call.to))?;
            let hash = *pending.tx_hash();
            debug!("⛓️ Sent call {}/{} → {}", i + 1, calls.len(), hash);

            if i + 1 < calls.len() {
                let receipt = pending
                    .get_receipt()
                    .await
                    .with_context(|| format!("No receipt for {}", hash))?;
                if !receipt.status() {
                    bail!("call {}/{} reverted in {}", i + 1, calls.len(), hash);
                }
            }
            last = Some(hash);
        }

        last.map(|h| h.to_string())
            .ok_or_else(|| anyhow!("no calls to submit"))
    }

    async fn await_finality(&self, tx_ref: &str) -> Result<()> {
        let hash: B256 = tx_ref
            .parse()
            .with_context(|| format!("Not a transaction hash: {}", tx_ref))?;
        let deadline = Instant::now() + FINALITY_TIMEOUT;

        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .with_context(|| format!("Failed to fetch receipt for {}", hash))?;
            if let Some(receipt) = receipt {
                if !receipt.status() {
                    return Err(Reverted {
                        tx_ref: tx_ref.to_string(),
                    }
                    .into());
                }
                if let Some(mined_in) = receipt.block_number {
                    let head = self
                        .provider
                        .get_block_number()
                        .await
                        .context("Failed to fetch block number")?;
                    let depth = head.saturating_sub(mined_in) + 1;
                    if depth >= self.confirmations {
                        debug!("✅ {} final at depth {}", hash, depth);
                        return Ok(());
                    }
                }
            }
            if Instant::now() >= deadline {
                bail!("{} not final after {:?}", hash, FINALITY_TIMEOUT);
            }
            tokio::time::sleep(RECEIPT_POLL).await;
        }
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<Amount> {
        let erc20 = IERC20::new(token, self.provider.clone());
        let balance: U256 = erc20
            .balanceOf(owner)
            .call()
            .await
            .with_context(|| format!("Failed to read balanceOf({}) on {}", owner, token))?;
        Ok(Amount::from(balance))
    }
}

// ─────────────────────────────────────────────────────────
// Paper mode
// ─────────────────────────────────────────────────────────

pub struct DryRunWallet {
    address: Address,
    seq: AtomicU64,
}

impl DryRunWallet {
    pub fn new(address: Address) -> Self {
        warn!("⚠️ DRY-RUN wallet {}: nothing will be signed or sent", address);
        Self {
            address,
            seq: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl WalletGateway for DryRunWallet {
    fn address(&self) -> Address {
        self.address
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    async fn submit(&self, calls: &[ContractCall]) -> Result<String> {
        if calls.is_empty() {
            bail!("no calls to submit");
        }
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let tx_ref = format!("dry-{:06}", n);
        info!("📝 [DRY-RUN] Would submit {} call(s), first to {} → {}", calls.len(), calls[0].to, tx_ref);
        Ok(tx_ref)
    }

    async fn await_finality(&self, _tx_ref: &str) -> Result<()> {
        Ok(())
    }

    async fn token_balance(&self, _token: Address, _owner: Address) -> Result<Amount> {
        Ok(Amount::ZERO)
    }
}
