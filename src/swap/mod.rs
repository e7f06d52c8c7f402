//! Private swap orchestration.
//!
//! Data flow:
//!   API layer ──SwapParams──▶ QueueHandle ──▶ PhaseQueue (single driver)
//!                                               │        │
//!                                    DepositLedger    PhaseExecutor ──▶ providers
//!                                               │
//!                                            EventBus ──▶ subscribers (push stream, pager)

pub mod events;
pub mod executor;
pub mod ledger;
pub mod messages;
pub mod queue;
pub mod recovery;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
