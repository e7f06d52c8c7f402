//! Scripted fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;

use super::executor::{Journal, PhaseError, PhaseExecutor, Redeposit, TradeFill};
use super::types::{Amount, ContractCall, PrivacyData, SwapParams};
use crate::providers::{PoolDeposit, PrivacyPool, Reverted, Route, TradeRouter, WalletGateway};

pub fn addr(n: u8) -> Address {
    Address::repeat_byte(n)
}

pub fn params(deposit_ref: &str, amount: u64) -> SwapParams {
    SwapParams {
        user_address: addr(1).to_string(),
        from_token: addr(2).to_string(),
        to_token: addr(3).to_string(),
        amount: amount.to_string(),
        slippage_bps: 50,
        recipient_address: None,
        deposit_reference: deposit_ref.to_string(),
        privacy_data: None,
    }
}

fn call_to(n: u8) -> ContractCall {
    ContractCall {
        to: addr(n),
        data: Bytes::from_static(&[0xab]),
        value: U256::ZERO,
    }
}

// ─────────────────────────────────────────────────────────
// Provider fakes
// ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakePool {
    pub withdraw_recipients: Arc<Mutex<Vec<Address>>>,
    pub empty_withdraw: Mutex<bool>,
}

#[async_trait]
impl PrivacyPool for FakePool {
    async fn deposit(&self, token: Address, amount: Amount, beneficiary: Address) -> anyhow::Result<PoolDeposit> {
        Ok(PoolDeposit {
            calls: vec![call_to(0xee)],
            privacy_data: PrivacyData(serde_json::json!({
                "token": token.to_string(),
                "amount": amount.to_string(),
                "beneficiary": beneficiary.to_string(),
            })),
        })
    }

    async fn withdraw(
        &self,
        _deposit_ref: &str,
        _amount: Amount,
        _privacy_data: &PrivacyData,
        recipient: Address,
    ) -> anyhow::Result<Vec<ContractCall>> {
        self.withdraw_recipients.lock().unwrap().push(recipient);
        if *self.empty_withdraw.lock().unwrap() {
            return Ok(vec![]);
        }
        Ok(vec![call_to(0xee)])
    }
}

pub struct FakeRouter {
    quote: Amount,
}

impl FakeRouter {
    pub fn quoting(out: u64) -> Self {
        Self { quote: Amount::from(out) }
    }
}

#[async_trait]
impl TradeRouter for FakeRouter {
    async fn best_route(&self, token_in: Address, token_out: Address, amount: Amount) -> anyhow::Result<Route> {
        Ok(Route {
            route_id: "r1".into(),
            token_in,
            token_out,
            amount_in: amount,
            quoted_out: self.quote,
        })
    }

    async fn build_calls(&self, _route: &Route, _taker: Address, _slippage_bps: u32) -> anyhow::Result<Vec<ContractCall>> {
        Ok(vec![call_to(0xdd)])
    }
}

pub struct FakeWallet {
    address: Address,
    dry_run: bool,
    nonce: AtomicU64,
    failing_submits: AtomicU32,
    failing_finality: AtomicU32,
    revert_next: AtomicBool,
    /// One-shot stalls, for cutting an attempt off mid-call.
    pub submit_delay: Mutex<Option<Duration>>,
    pub finality_delay: Mutex<Option<Duration>>,
    pending_credits: Mutex<Vec<(Address, Amount)>>,
    balances: Mutex<HashMap<Address, Amount>>,
    pub finalized: Mutex<Vec<String>>,
}

impl FakeWallet {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            dry_run: false,
            nonce: AtomicU64::new(0),
            failing_submits: AtomicU32::new(0),
            failing_finality: AtomicU32::new(0),
            revert_next: AtomicBool::new(false),
            submit_delay: Mutex::new(None),
            finality_delay: Mutex::new(None),
            pending_credits: Mutex::new(vec![]),
            balances: Mutex::new(HashMap::new()),
            finalized: Mutex::new(vec![]),
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Next submission credits `amount` of `token` to the custodian.
    pub fn credit_on_submit(&self, token: Address, amount: Amount) {
        self.pending_credits.lock().unwrap().push((token, amount));
    }

    pub fn fail_submits(&self, n: u32) {
        self.failing_submits.store(n, Ordering::SeqCst);
    }

    /// Next `n` finality checks error out without a verdict.
    pub fn fail_finality(&self, n: u32) {
        self.failing_finality.store(n, Ordering::SeqCst);
    }

    /// Next finality check reports a revert.
    pub fn revert_next(&self) {
        self.revert_next.store(true, Ordering::SeqCst);
    }

    /// Submissions that produced a reference.
    pub fn submissions(&self) -> u64 {
        self.nonce.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletGateway for FakeWallet {
    fn address(&self) -> Address {
        self.address
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    async fn submit(&self, _calls: &[ContractCall]) -> anyhow::Result<String> {
        let stall = self.submit_delay.lock().unwrap().take();
        if let Some(d) = stall {
            tokio::time::sleep(d).await;
        }
        if self
            .failing_submits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("nonce too low");
        }
        let mut balances = self.balances.lock().unwrap();
        for (token, amount) in self.pending_credits.lock().unwrap().drain(..) {
            let cur = balances.entry(token).or_default();
            *cur = cur.checked_add(amount).unwrap();
        }
        let n = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("0x{:064x}", n))
    }

    async fn await_finality(&self, tx_ref: &str) -> anyhow::Result<()> {
        let stall = self.finality_delay.lock().unwrap().take();
        if let Some(d) = stall {
            tokio::time::sleep(d).await;
        }
        if self.revert_next.swap(false, Ordering::SeqCst) {
            return Err(Reverted {
                tx_ref: tx_ref.to_string(),
            }
            .into());
        }
        if self
            .failing_finality
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("receipt lookup failed for {}", tx_ref);
        }
        self.finalized.lock().unwrap().push(tx_ref.to_string());
        Ok(())
    }

    async fn token_balance(&self, token: Address, _owner: Address) -> anyhow::Result<Amount> {
        Ok(self.balances.lock().unwrap().get(&token).copied().unwrap_or_default())
    }
}

// ─────────────────────────────────────────────────────────
// Scripted executor (queue tests)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ExecCall {
    Withdraw { deposit_ref: String, amount: Amount },
    Trade { from: Address, to: Address, amount: Amount },
    Redeposit { token: Address, amount: Amount, owner: Address },
}

#[derive(Default)]
pub struct ScriptedExecutor {
    pub calls: Mutex<Vec<ExecCall>>,
    /// Remaining failures per phase; `u32::MAX` fails forever.
    pub withdraw_failures: AtomicU32,
    pub trade_failures: AtomicU32,
    pub redeposit_failures: AtomicU32,
    /// Makes trade failures non-retryable.
    pub reject_trade: Mutex<bool>,
    pub trade_output: Mutex<Option<Amount>>,
    pub delay: Mutex<Option<Duration>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn failing_withdraw(n: u32) -> Self {
        let s = Self::default();
        s.withdraw_failures.store(n, Ordering::SeqCst);
        s
    }

    pub fn failing_trade(n: u32) -> Self {
        let s = Self::default();
        s.trade_failures.store(n, Ordering::SeqCst);
        s
    }

    pub fn failing_redeposit(n: u32) -> Self {
        let s = Self::default();
        s.redeposit_failures.store(n, Ordering::SeqCst);
        s
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn redeposit_calls(&self) -> Vec<ExecCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, ExecCall::Redeposit { .. }))
            .collect()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }

    async fn enter(&self, call: ExecCall) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call);
        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PhaseExecutor for ScriptedExecutor {
    async fn withdraw(
        &self,
        deposit_ref: &str,
        amount: Amount,
        _privacy_data: &PrivacyData,
        _journal: &Journal,
    ) -> Result<String, PhaseError> {
        self.enter(ExecCall::Withdraw { deposit_ref: deposit_ref.to_string(), amount }).await;
        let failed = Self::take_failure(&self.withdraw_failures);
        self.exit();
        if failed {
            return Err(PhaseError::Transient("rpc timeout".into()));
        }
        Ok(format!("wd-{}", deposit_ref))
    }

    async fn trade(
        &self,
        from: Address,
        to: Address,
        amount: Amount,
        _slippage_bps: u32,
        _journal: &Journal,
    ) -> Result<TradeFill, PhaseError> {
        self.enter(ExecCall::Trade { from, to, amount }).await;
        let failed = Self::take_failure(&self.trade_failures);
        self.exit();
        if failed {
            if *self.reject_trade.lock().unwrap() {
                return Err(PhaseError::Rejected("route payload unusable".into()));
            }
            return Err(PhaseError::Transient("no route".into()));
        }
        let output_amount = self.trade_output.lock().unwrap().unwrap_or(amount);
        Ok(TradeFill { tx_ref: "trade-tx".into(), output_amount })
    }

    async fn redeposit(
        &self,
        token: Address,
        amount: Amount,
        owner: Address,
        _journal: &Journal,
    ) -> Result<Redeposit, PhaseError> {
        self.enter(ExecCall::Redeposit { token, amount, owner }).await;
        let failed = Self::take_failure(&self.redeposit_failures);
        self.exit();
        if failed {
            return Err(PhaseError::Transient("pool unavailable".into()));
        }
        Ok(Redeposit {
            tx_ref: format!("rd-{}", token),
            privacy_data: PrivacyData(serde_json::json!({"note": amount.to_string()})),
        })
    }
}
