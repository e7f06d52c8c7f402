//! Phase Executor — one external side effect per phase.
//!
//! Stateless: it never retries and never touches the queue or ledger. Every
//! failure comes back classified so the queue can apply one retry policy.
//!
//!   WITHDRAWING  → privacy pool withdraw calls  → wallet
//!   SWAPPING     → aggregator route + calls     → wallet → realized output
//!   REDEPOSITING → privacy pool deposit calls   → wallet → new privacy data
//!
//! Each call writes its submitted reference to a [`Journal`] the moment the
//! wallet hands it back. A later attempt seeded with that entry confirms the
//! reference instead of sending the calls again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::Address;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::{Amount, ContractCall, PrivacyData, SubmittedTx};
use crate::providers::{PrivacyPool, Reverted, TradeRouter, WalletGateway};

// ─────────────────────────────────────────────────────────
// Results & errors
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseError {
    /// Network, RPC, or liquidity hiccup. Worth another attempt.
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying the same inputs cannot succeed.
    #[error("rejected: {0}")]
    Rejected(String),
    /// Calls may have gone out but no reference came back.
    #[error("outcome unknown: {0}")]
    Unknown(String),
}

impl PhaseError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PhaseError::Transient(_))
    }
}

fn transient(what: &'static str) -> impl FnOnce(anyhow::Error) -> PhaseError {
    move |e| PhaseError::Transient(format!("{}: {:#}", what, e))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeFill {
    pub tx_ref: String,
    /// Realized output, measured after finality. Not the quote.
    pub output_amount: Amount,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redeposit {
    pub tx_ref: String,
    pub privacy_data: PrivacyData,
}

// ─────────────────────────────────────────────────────────
// Journal
// ─────────────────────────────────────────────────────────

/// Submission record for one phase attempt. Shared with the caller by
/// reference, so it survives the attempt being cut off by a timeout.
#[derive(Debug, Default)]
pub struct Journal {
    entry: Mutex<Option<SubmittedTx>>,
    sending: AtomicBool,
}

impl Journal {
    /// Seeds the journal with the calls a previous attempt already sent.
    pub fn resume(prior: Option<SubmittedTx>) -> Self {
        Self {
            entry: Mutex::new(prior),
            sending: AtomicBool::new(false),
        }
    }

    pub fn record(&self, tx: SubmittedTx) {
        *self.slot() = Some(tx);
    }

    pub fn peek(&self) -> Option<SubmittedTx> {
        self.slot().clone()
    }

    pub fn take(&self) -> Option<SubmittedTx> {
        self.slot().take()
    }

    /// True while a submission was started and neither failed cleanly nor
    /// produced a reference.
    pub fn in_doubt(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<SubmittedTx>> {
        self.entry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn withdraw(
        &self,
        deposit_ref: &str,
        amount: Amount,
        privacy_data: &PrivacyData,
        journal: &Journal,
    ) -> Result<String, PhaseError>;

    async fn trade(
        &self,
        from_token: Address,
        to_token: Address,
        amount: Amount,
        slippage_bps: u32,
        journal: &Journal,
    ) -> Result<TradeFill, PhaseError>;

    async fn redeposit(
        &self,
        token: Address,
        amount: Amount,
        owner: Address,
        journal: &Journal,
    ) -> Result<Redeposit, PhaseError>;
}

// ─────────────────────────────────────────────────────────
// Provider-backed executor
// ─────────────────────────────────────────────────────────

pub struct ProviderExecutor {
    pool: Arc<dyn PrivacyPool>,
    router: Arc<dyn TradeRouter>,
    wallet: Arc<dyn WalletGateway>,
}

impl ProviderExecutor {
    pub fn new(
        pool: Arc<dyn PrivacyPool>,
        router: Arc<dyn TradeRouter>,
        wallet: Arc<dyn WalletGateway>,
    ) -> Self {
        Self { pool, router, wallet }
    }

    /// Submits `calls` and journals the reference before anything else can
    /// fail. `entry` carries whatever a resumed attempt needs besides it.
    async fn submit(
        &self,
        what: &'static str,
        calls: &[ContractCall],
        journal: &Journal,
        mut entry: SubmittedTx,
    ) -> Result<SubmittedTx, PhaseError> {
        if calls.is_empty() {
            return Err(PhaseError::Rejected(format!("{}: provider returned no calls", what)));
        }
        journal.sending.store(true, Ordering::SeqCst);
        let sent = self.wallet.submit(calls).await;
        journal.sending.store(false, Ordering::SeqCst);

        entry.tx_ref = sent.map_err(transient(what))?;
        journal.record(entry.clone());
        debug!("⛓️ {} submitted {} call(s) → {}", what, calls.len(), entry.tx_ref);
        Ok(entry)
    }

    /// Waits for finality. A revert drops the journal entry: nothing
    /// happened, so the next attempt may send fresh calls.
    async fn confirm(&self, what: &'static str, tx_ref: &str, journal: &Journal) -> Result<(), PhaseError> {
        match self.wallet.await_finality(tx_ref).await {
            Ok(()) => Ok(()),
            Err(e) if e.downcast_ref::<Reverted>().is_some() => {
                journal.take();
                warn!("↩️ {} {} reverted; it may be sent again", what, tx_ref);
                Err(PhaseError::Transient(format!("{}: {:#}", what, e)))
            }
            Err(e) => Err(transient(what)(e)),
        }
    }

    /// Journal entry left by an earlier attempt of this phase, if any.
    fn resumed(what: &str, journal: &Journal) -> Option<SubmittedTx> {
        let prior = journal.peek()?;
        info!("♻️ {} already sent as {}; confirming instead of resending", what, prior.tx_ref);
        Some(prior)
    }

    async fn measure_output(&self, to_token: Address, sent: &SubmittedTx) -> Result<Amount, PhaseError> {
        if self.wallet.is_dry_run() {
            return sent.quoted_out.ok_or_else(|| {
                PhaseError::Rejected(format!("trade {} has no recorded quote", sent.tx_ref))
            });
        }
        let before = sent.balance_before.ok_or_else(|| {
            PhaseError::Rejected(format!("trade {} has no recorded starting balance", sent.tx_ref))
        })?;
        let after = self
            .wallet
            .token_balance(to_token, self.wallet.address())
            .await
            .map_err(transient("balance"))?;

        match after.checked_sub(before) {
            Some(out) if !out.is_zero() => Ok(out),
            _ => Err(PhaseError::Rejected(format!(
                "trade {} settled but output balance went {} → {}",
                sent.tx_ref, before, after
            ))),
        }
    }
}

#[async_trait]
impl PhaseExecutor for ProviderExecutor {
    async fn withdraw(
        &self,
        deposit_ref: &str,
        amount: Amount,
        privacy_data: &PrivacyData,
        journal: &Journal,
    ) -> Result<String, PhaseError> {
        let sent = match Self::resumed("withdraw", journal) {
            Some(prior) => prior,
            None => {
                let custodian = self.wallet.address();
                let calls = self
                    .pool
                    .withdraw(deposit_ref, amount, privacy_data, custodian)
                    .await
                    .map_err(transient("withdraw"))?;
                self.submit("withdraw", &calls, journal, SubmittedTx::new(""))
                    .await?
            }
        };
        self.confirm("withdraw", &sent.tx_ref, journal).await?;
        info!("🔓 Withdrew {} from {} → {}", amount, deposit_ref, sent.tx_ref);
        Ok(sent.tx_ref)
    }

    async fn trade(
        &self,
        from_token: Address,
        to_token: Address,
        amount: Amount,
        slippage_bps: u32,
        journal: &Journal,
    ) -> Result<TradeFill, PhaseError> {
        let sent = match Self::resumed("trade", journal) {
            Some(prior) => prior,
            None => {
                let custodian = self.wallet.address();
                let route = self
                    .router
                    .best_route(from_token, to_token, amount)
                    .await
                    .map_err(transient("route"))?;
                if route.quoted_out.is_zero() {
                    return Err(PhaseError::Transient(format!(
                        "route {}: no liquidity for {} → {}",
                        route.route_id, from_token, to_token
                    )));
                }
                let calls = self
                    .router
                    .build_calls(&route, custodian, slippage_bps)
                    .await
                    .map_err(transient("build"))?;

                let mut entry = SubmittedTx::new("");
                entry.quoted_out = Some(route.quoted_out);
                if !self.wallet.is_dry_run() {
                    entry.balance_before = Some(
                        self.wallet
                            .token_balance(to_token, custodian)
                            .await
                            .map_err(transient("balance"))?,
                    );
                }
                debug!("🧭 Trade {} via route {} quoted {}", amount, route.route_id, route.quoted_out);
                self.submit("trade", &calls, journal, entry).await?
            }
        };
        self.confirm("trade", &sent.tx_ref, journal).await?;

        let output_amount = self.measure_output(to_token, &sent).await?;
        if self.wallet.is_dry_run() {
            info!("📝 [DRY-RUN] Trade {} → quoted {} ({})", amount, output_amount, sent.tx_ref);
        } else {
            if let Some(quoted) = sent.quoted_out.filter(|q| output_amount < *q) {
                warn!("📉 Realized {} below quote {} ({})", output_amount, quoted, sent.tx_ref);
            }
            info!("🔁 Traded {} → {} via {}", amount, output_amount, sent.tx_ref);
        }
        Ok(TradeFill {
            tx_ref: sent.tx_ref,
            output_amount,
        })
    }

    async fn redeposit(
        &self,
        token: Address,
        amount: Amount,
        owner: Address,
        journal: &Journal,
    ) -> Result<Redeposit, PhaseError> {
        let sent = match Self::resumed("redeposit", journal) {
            Some(prior) => prior,
            None => {
                let deposit = self
                    .pool
                    .deposit(token, amount, owner)
                    .await
                    .map_err(transient("redeposit"))?;
                let mut entry = SubmittedTx::new("");
                entry.privacy_data = Some(deposit.privacy_data);
                self.submit("redeposit", &deposit.calls, journal, entry).await?
            }
        };
        self.confirm("redeposit", &sent.tx_ref, journal).await?;

        let privacy_data = sent.privacy_data.ok_or_else(|| {
            PhaseError::Rejected(format!("redeposit {} has no recorded privacy data", sent.tx_ref))
        })?;
        info!("🔒 Re-deposited {} of {} for {} → {}", amount, token, owner, sent.tx_ref);
        Ok(Redeposit {
            tx_ref: sent.tx_ref,
            privacy_data,
        })
    }
}
