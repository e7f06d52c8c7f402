//! Core records of the swap engine: in-flight requests, funded deposits,
//! and the exact-integer `Amount` both of them are denominated in.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, Bytes, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

pub const MAX_SLIPPAGE_BPS: u32 = 10_000;

// ─────────────────────────────────────────────────────────
// Input errors
// ─────────────────────────────────────────────────────────

/// Rejections raised synchronously on submission. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("invalid {field}: {value:?} is not a 20-byte hex address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("invalid amount {0:?}: expected a positive base-10 integer")]
    InvalidAmount(String),

    #[error("fromToken and toToken must differ")]
    SameToken,

    #[error("slippage {0} bps exceeds 10000")]
    SlippageOutOfRange(u32),

    #[error("depositReference is required")]
    MissingDepositReference,

    #[error("maxRetries must be at least 1")]
    ZeroRetries,
}

// ─────────────────────────────────────────────────────────
// Amount
// ─────────────────────────────────────────────────────────

/// Token amount in base units. Serialized as a decimal string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(U256);

impl Amount {
    pub const ZERO: Self = Self(U256::ZERO);

    pub fn new(value: U256) -> Self {
        Self(value)
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Self(U256::from(v))
    }
}

impl From<U256> for Amount {
    fn from(v: U256) -> Self {
        Self(v)
    }
}

impl FromStr for Amount {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InputError::InvalidAmount(s.to_string()));
        }
        U256::from_str_radix(digits, 10)
            .map(Self)
            .map_err(|_| InputError::InvalidAmount(s.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Opaque secret material handed out by the privacy pool. Required to
/// withdraw whatever deposit produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivacyData(pub serde_json::Value);

/// One executable call for the custodial signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    pub to: Address,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub value: U256,
}

// ─────────────────────────────────────────────────────────
// Phase state machine
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Pending,
    Depositing,
    Withdrawing,
    Swapping,
    Redepositing,
    ReadyToWithdraw,
    Completed,
    Failed,
}

impl Phase {
    /// Successor on the happy path. `None` for terminal phases.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Pending | Phase::Depositing => Some(Phase::Withdrawing),
            Phase::Withdrawing => Some(Phase::Swapping),
            Phase::Swapping => Some(Phase::Redepositing),
            Phase::Redepositing => Some(Phase::ReadyToWithdraw),
            Phase::ReadyToWithdraw => Some(Phase::Completed),
            Phase::Completed | Phase::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// Phases whose step performs an external side effect.
    pub fn has_side_effect(self) -> bool {
        matches!(
            self,
            Phase::Withdrawing | Phase::Swapping | Phase::Redepositing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "PENDING",
            Phase::Depositing => "DEPOSITING",
            Phase::Withdrawing => "WITHDRAWING",
            Phase::Swapping => "SWAPPING",
            Phase::Redepositing => "REDEPOSITING",
            Phase::ReadyToWithdraw => "READY_TO_WITHDRAW",
            Phase::Completed => "COMPLETED",
            Phase::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction references produced by the custodial leg, one per phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyTxRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeposit: Option<String>,
}

/// Calls of the current phase that already went out on-chain. Kept until the
/// phase completes so a retry confirms this reference instead of sending
/// the calls again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedTx {
    pub tx_ref: String,
    /// Custodial output-token balance right before a trade was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_before: Option<Amount>,
    /// Quote the trade was built from; paper mode reports it as the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_out: Option<Amount>,
    /// Secret material the submitted re-deposit creates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_data: Option<PrivacyData>,
}

impl SubmittedTx {
    pub fn new(tx_ref: impl Into<String>) -> Self {
        Self {
            tx_ref: tx_ref.into(),
            balance_before: None,
            quoted_out: None,
            privacy_data: None,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Swap request
// ─────────────────────────────────────────────────────────

/// Raw submission as received from the API layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapParams {
    pub user_address: String,
    pub from_token: String,
    pub to_token: String,
    pub amount: String,
    pub slippage_bps: u32,
    #[serde(default)]
    pub recipient_address: Option<String>,
    pub deposit_reference: String,
    #[serde(default)]
    pub privacy_data: Option<PrivacyData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub id: Uuid,
    pub user_address: Address,
    pub from_token: Address,
    pub to_token: Address,
    pub amount: Amount,
    pub slippage_bps: u32,
    pub recipient_address: Address,
    pub deposit_reference: String,
    pub phase: Phase,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub proxy_tx_refs: ProxyTxRefs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_data: Option<PrivacyData>,
    /// Realized trade output, set once SWAPPING completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_amount: Option<Amount>,
    /// Set while the current phase's calls are sent but not yet confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_tx: Option<SubmittedTx>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, InputError> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|_| InputError::InvalidAddress {
            field,
            value: value.to_string(),
        })
}

impl SwapRequest {
    pub fn new(params: SwapParams, max_retries: u32) -> Result<Self, InputError> {
        if max_retries == 0 {
            return Err(InputError::ZeroRetries);
        }
        let user_address = parse_address("userAddress", &params.user_address)?;
        let from_token = parse_address("fromToken", &params.from_token)?;
        let to_token = parse_address("toToken", &params.to_token)?;
        let recipient_address = match params.recipient_address.as_deref() {
            Some(r) if !r.trim().is_empty() => parse_address("recipientAddress", r)?,
            _ => user_address,
        };
        if from_token == to_token {
            return Err(InputError::SameToken);
        }
        let amount: Amount = params.amount.parse()?;
        if amount.is_zero() {
            return Err(InputError::InvalidAmount(params.amount));
        }
        if params.slippage_bps > MAX_SLIPPAGE_BPS {
            return Err(InputError::SlippageOutOfRange(params.slippage_bps));
        }
        let deposit_reference = params.deposit_reference.trim().to_string();
        if deposit_reference.is_empty() {
            return Err(InputError::MissingDepositReference);
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            user_address,
            from_token,
            to_token,
            amount,
            slippage_bps: params.slippage_bps,
            recipient_address,
            deposit_reference,
            phase: Phase::Pending,
            retry_count: 0,
            max_retries,
            proxy_tx_refs: ProxyTxRefs::default(),
            privacy_data: params.privacy_data,
            output_amount: None,
            submitted_tx: None,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// First 8 chars of the id, for log lines.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Moves to the next phase on the happy path and clears per-phase
    /// retry state. Returns `(from, to)`.
    pub fn advance(&mut self) -> Option<(Phase, Phase)> {
        let from = self.phase;
        let to = from.next()?;
        self.phase = to;
        self.retry_count = 0;
        self.submitted_tx = None;
        self.error = None;
        self.touch();
        Some((from, to))
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.phase = Phase::Failed;
        self.error = Some(error.into());
        self.touch();
    }
}

// ─────────────────────────────────────────────────────────
// Deposit
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Confirmed,
    Available,
    PartiallyUsed,
    Exhausted,
}

impl DepositStatus {
    /// Whether a deposit in this status may back a trade.
    pub fn is_spendable(self) -> bool {
        matches!(self, DepositStatus::Available | DepositStatus::PartiallyUsed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    pub deposit_id: String,
    pub tx_reference: String,
    pub owner_address: Address,
    pub token_address: Address,
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_balance: Option<Amount>,
    pub status: DepositStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_data: Option<PrivacyData>,
    /// Placeholder references this record was reconciled from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_references: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Deposit {
    pub fn new(
        owner_address: Address,
        token_address: Address,
        amount: Amount,
        tx_reference: impl Into<String>,
    ) -> Self {
        Self {
            deposit_id: Uuid::new_v4().to_string(),
            tx_reference: tx_reference.into(),
            owner_address,
            token_address,
            amount,
            remaining_balance: None,
            status: DepositStatus::Pending,
            privacy_data: None,
            previous_references: vec![],
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: DepositStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_privacy_data(mut self, privacy_data: PrivacyData) -> Self {
        self.privacy_data = Some(privacy_data);
        self
    }

    /// Remaining balance, falling back to the original amount when unset.
    pub fn remaining(&self) -> Amount {
        self.remaining_balance.unwrap_or(self.amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: &str = "0x1111111111111111111111111111111111111111";
    const WETH: &str = "0x2222222222222222222222222222222222222222";
    const USDC: &str = "0x3333333333333333333333333333333333333333";

    fn params() -> SwapParams {
        SwapParams {
            user_address: USER.into(),
            from_token: WETH.into(),
            to_token: USDC.into(),
            amount: "600000000000000000".into(),
            slippage_bps: 50,
            recipient_address: None,
            deposit_reference: "0xdeadbeef".into(),
            privacy_data: None,
        }
    }

    #[test]
    fn test_amount_exceeds_f64_precision() {
        let a: Amount = "123456789012345678901234567890".parse().unwrap();
        let b: Amount = "1".parse().unwrap();
        assert_eq!(
            a.checked_add(b).unwrap().to_string(),
            "123456789012345678901234567891"
        );
    }

    #[test]
    fn test_amount_rejects_non_integers() {
        for bad in ["", "1.5", "-3", "1e18", "0x10", "abc"] {
            assert!(bad.parse::<Amount>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_amount_serializes_as_decimal_string() {
        let a: Amount = "1000000000000000000".parse().unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"1000000000000000000\"");
        let back: Amount = serde_json::from_str("\"1000000000000000000\"").unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn test_request_defaults_recipient_to_user() {
        let req = SwapRequest::new(params(), 3).unwrap();
        assert_eq!(req.recipient_address, req.user_address);
        assert_eq!(req.phase, Phase::Pending);
        assert_eq!(req.max_retries, 3);
    }

    #[test]
    fn test_request_validation() {
        let mut p = params();
        p.to_token = WETH.into();
        assert_eq!(SwapRequest::new(p, 3).unwrap_err(), InputError::SameToken);

        let mut p = params();
        p.amount = "0".into();
        assert!(matches!(SwapRequest::new(p, 3), Err(InputError::InvalidAmount(_))));

        let mut p = params();
        p.slippage_bps = 10_001;
        assert_eq!(
            SwapRequest::new(p, 3).unwrap_err(),
            InputError::SlippageOutOfRange(10_001)
        );

        let mut p = params();
        p.user_address = "not-an-address".into();
        assert!(matches!(
            SwapRequest::new(p, 3),
            Err(InputError::InvalidAddress { field: "userAddress", .. })
        ));

        let mut p = params();
        p.deposit_reference = "  ".into();
        assert_eq!(
            SwapRequest::new(p, 3).unwrap_err(),
            InputError::MissingDepositReference
        );

        assert_eq!(SwapRequest::new(params(), 0).unwrap_err(), InputError::ZeroRetries);
    }

    #[test]
    fn test_phase_order_is_linear() {
        let mut seen = vec![];
        let mut p = Phase::Pending;
        while let Some(n) = p.next() {
            seen.push(n);
            p = n;
        }
        assert_eq!(
            seen,
            vec![
                Phase::Withdrawing,
                Phase::Swapping,
                Phase::Redepositing,
                Phase::ReadyToWithdraw,
                Phase::Completed,
            ]
        );
        assert_eq!(Phase::Failed.next(), None);
    }

    #[test]
    fn test_request_json_shape() {
        let mut req = SwapRequest::new(params(), 3).unwrap();
        req.proxy_tx_refs.withdrawal = Some("0xabc".into());
        req.privacy_data = Some(PrivacyData(serde_json::json!({"note": "n1"})));
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["phase"], "PENDING");
        assert_eq!(v["amount"], "600000000000000000");
        assert_eq!(v["slippageBps"], 50);
        assert_eq!(v["proxyTxRefs"]["withdrawal"], "0xabc");
        assert!(v["proxyTxRefs"].get("trade").is_none());
        assert_eq!(v["privacyData"]["note"], "n1");

        let back: SwapRequest = serde_json::from_value(v).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_deposit_remaining_falls_back_to_amount() {
        let d = Deposit::new(
            USER.parse().unwrap(),
            WETH.parse().unwrap(),
            Amount::from(500),
            "0x01",
        );
        assert_eq!(d.remaining(), Amount::from(500));
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["status"], "pending");
        assert!(v.get("remainingBalance").is_none());
    }
}
