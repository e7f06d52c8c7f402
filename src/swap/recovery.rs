//! Fund recovery for requests that fail partway through the custodial leg.
//!
//! Which funds sit in the custodial wallet depends only on the phase that
//! failed:
//!   WITHDRAWING  → nothing left the pool
//!   SWAPPING     → the withdrawn input, in `fromToken`
//!   REDEPOSITING → the trade output, in `toToken`
//!
//! Once a phase's own calls may have gone out, that table no longer holds:
//! the funds could already have moved, so only an operator can settle it.

use alloy_primitives::Address;

use super::executor::PhaseError;
use super::types::{Amount, Phase, SwapRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPlan {
    pub token: Address,
    pub amount: Amount,
    /// Owner credited with the re-deposit.
    pub beneficiary: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryDecision {
    NotNeeded,
    Redeposit(RecoveryPlan),
    /// Funds are custodial but the amount is unknown; only an operator can
    /// settle this.
    Unrecoverable(String),
}

pub fn plan(request: &SwapRequest, failed_in: Phase, cause: &PhaseError) -> RecoveryDecision {
    if failed_in.has_side_effect() {
        if let PhaseError::Unknown(reason) = cause {
            return RecoveryDecision::Unrecoverable(format!(
                "{} calls may have been sent: {}",
                failed_in, reason
            ));
        }
        if let Some(sent) = &request.submitted_tx {
            return RecoveryDecision::Unrecoverable(format!(
                "{} calls {} were sent but the phase never completed",
                failed_in, sent.tx_ref
            ));
        }
    }
    match failed_in {
        Phase::Swapping => RecoveryDecision::Redeposit(RecoveryPlan {
            token: request.from_token,
            amount: request.amount,
            beneficiary: request.user_address,
        }),
        Phase::Redepositing => match request.output_amount {
            Some(amount) => RecoveryDecision::Redeposit(RecoveryPlan {
                token: request.to_token,
                amount,
                beneficiary: request.recipient_address,
            }),
            None => RecoveryDecision::Unrecoverable(format!(
                "trade {} settled without a recorded output amount",
                request.proxy_tx_refs.trade.as_deref().unwrap_or("?")
            )),
        },
        _ => RecoveryDecision::NotNeeded,
    }
}
