//! Message types published by the phase queue.
//!
//! Every event carries the full request snapshot taken right after the
//! transition it reports, so a subscriber never has to query back.

use alloy_primitives::Address;
use serde::Serialize;
use uuid::Uuid;

use super::types::{Amount, Phase, SwapRequest};

// ─────────────────────────────────────────────────────────
// Lifecycle events (PhaseQueue → EventBus → subscribers)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SwapEvent {
    /// An external side effect for `phase` finished successfully.
    PhaseCompleted { phase: Phase, request: SwapRequest },
    /// The request moved from one phase to the next.
    PhaseAdvanced {
        from: Phase,
        to: Phase,
        request: SwapRequest,
    },
    RequestCompleted { request: SwapRequest },
    RequestFailed { request: SwapRequest },
    /// The same phase will be attempted again after `retry_in_ms`.
    #[serde(rename_all = "camelCase")]
    RequestRetrying {
        attempt: u32,
        retry_in_ms: u64,
        request: SwapRequest,
    },
    /// Compensation moved custodial funds back into the pool.
    #[serde(rename_all = "camelCase")]
    FundsRecovered {
        token: Address,
        amount: Amount,
        tx_ref: String,
        request: SwapRequest,
    },
    /// Compensation failed. Funds may be stranded in the custodial wallet;
    /// needs an operator.
    FundRecoveryFailed { reason: String, request: SwapRequest },
}

impl SwapEvent {
    pub fn request(&self) -> &SwapRequest {
        match self {
            SwapEvent::PhaseCompleted { request, .. }
            | SwapEvent::PhaseAdvanced { request, .. }
            | SwapEvent::RequestCompleted { request }
            | SwapEvent::RequestFailed { request }
            | SwapEvent::RequestRetrying { request, .. }
            | SwapEvent::FundsRecovered { request, .. }
            | SwapEvent::FundRecoveryFailed { request, .. } => request,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request().id
    }

    pub fn name(&self) -> &'static str {
        match self {
            SwapEvent::PhaseCompleted { .. } => "phaseCompleted",
            SwapEvent::PhaseAdvanced { .. } => "phaseAdvanced",
            SwapEvent::RequestCompleted { .. } => "requestCompleted",
            SwapEvent::RequestFailed { .. } => "requestFailed",
            SwapEvent::RequestRetrying { .. } => "requestRetrying",
            SwapEvent::FundsRecovered { .. } => "fundsRecovered",
            SwapEvent::FundRecoveryFailed { .. } => "fundRecoveryFailed",
        }
    }
}

// ─────────────────────────────────────────────────────────
// Queue status (QueueHandle → API layer)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub length: usize,
    /// Head request has a call in flight or a retry pending.
    pub busy: bool,
    pub head_request_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::types::SwapParams;

    fn req() -> SwapRequest {
        SwapRequest::new(
            SwapParams {
                user_address: "0x1111111111111111111111111111111111111111".into(),
                from_token: "0x2222222222222222222222222222222222222222".into(),
                to_token: "0x3333333333333333333333333333333333333333".into(),
                amount: "1000".into(),
                slippage_bps: 30,
                deposit_reference: "0xaa".into(),
                ..Default::default()
            },
            3,
        )
        .unwrap()
    }

    #[test]
    fn test_event_tag_matches_name() {
        let events = vec![
            SwapEvent::PhaseCompleted { phase: Phase::Withdrawing, request: req() },
            SwapEvent::RequestRetrying { attempt: 1, retry_in_ms: 5000, request: req() },
            SwapEvent::FundRecoveryFailed { reason: "rpc down".into(), request: req() },
        ];
        for e in events {
            let v = serde_json::to_value(&e).unwrap();
            assert_eq!(v["event"], e.name());
            assert_eq!(v["request"]["id"], e.request_id().to_string());
        }
    }

    #[test]
    fn test_retrying_payload_fields() {
        let e = SwapEvent::RequestRetrying { attempt: 2, retry_in_ms: 750, request: req() };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["attempt"], 2);
        assert_eq!(v["retryInMs"], 750);
    }
}
