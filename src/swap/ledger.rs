//! Deposit Ledger — funded balances that can back a swap.
//!
//! Keyed by `(owner, txReference)`. The ledger is the single writer of
//! deposit records; everything else reads snapshots.
//!
//! Selection is best-fit: the smallest spendable balance that still covers
//! the requested amount, so small trades do not fragment large deposits.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{Amount, Deposit, DepositStatus};

pub type SharedLedger = Arc<RwLock<DepositLedger>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("deposit {tx_reference} not found for {owner}")]
    NotFound { owner: Address, tx_reference: String },

    #[error("remaining balance {remaining} exceeds deposit amount {amount}")]
    RemainingAboveAmount { remaining: Amount, amount: Amount },

    #[error("deposit {tx_reference} holds {available}, cannot consume {requested}")]
    InsufficientBalance {
        tx_reference: String,
        available: Amount,
        requested: Amount,
    },

    #[error("balance overflow summing deposits of {owner}")]
    Overflow { owner: Address },
}

#[derive(Debug, Default)]
pub struct DepositLedger {
    deposits: HashMap<Address, HashMap<String, Deposit>>,
    /// placeholder reference → real on-chain reference, per owner.
    aliases: HashMap<(Address, String), String>,
}

impl DepositLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedLedger {
        Arc::new(RwLock::new(self))
    }

    pub fn from_deposits(deposits: impl IntoIterator<Item = Deposit>) -> Self {
        let mut ledger = Self::new();
        for d in deposits {
            ledger.track(d);
        }
        ledger
    }

    /// Insert-or-replace by `(owner, txReference)`. Placeholder references
    /// recorded on the deposit (or on the record it replaces) keep resolving.
    pub fn track(&mut self, mut deposit: Deposit) {
        let owner = deposit.owner_address;
        let by_ref = self.deposits.entry(owner).or_default();
        if let Some(old) = by_ref.get(&deposit.tx_reference) {
            for prev in &old.previous_references {
                if !deposit.previous_references.contains(prev) {
                    deposit.previous_references.push(prev.clone());
                }
            }
        }
        for prev in &deposit.previous_references {
            self.aliases
                .insert((owner, prev.clone()), deposit.tx_reference.clone());
        }
        let replaced = by_ref.insert(deposit.tx_reference.clone(), deposit);
        if let Some(old) = replaced {
            debug!("🧾 Replaced deposit {} for {}", old.tx_reference, owner);
        }
    }

    /// Moves a deposit recorded under a temporary placeholder to its real
    /// on-chain reference. Returns false if the placeholder is unknown.
    ///
    /// If the real reference is already tracked, that record keeps its
    /// status and balances; the placeholder only contributes privacy data
    /// the real record lacks.
    pub fn reconcile(&mut self, owner: Address, placeholder: &str, real: &str) -> bool {
        let Some(by_ref) = self.deposits.get_mut(&owner) else {
            return false;
        };
        if placeholder == real {
            return by_ref.contains_key(real);
        }
        let Some(mut deposit) = by_ref.remove(placeholder) else {
            return false;
        };

        let mut previous = std::mem::take(&mut deposit.previous_references);
        previous.push(placeholder.to_string());

        let mut merged = match by_ref.remove(real) {
            Some(mut existing) => {
                warn!(
                    "🧾 Deposit {} already tracked for {}; merging placeholder {} into it ({:?} kept over {:?})",
                    real, owner, placeholder, existing.status, deposit.status
                );
                if existing.privacy_data.is_none() {
                    existing.privacy_data = deposit.privacy_data.take();
                }
                existing
            }
            None => {
                deposit.tx_reference = real.to_string();
                deposit
            }
        };
        for prev in previous {
            if !merged.previous_references.contains(&prev) {
                merged.previous_references.push(prev);
            }
        }
        for prev in &merged.previous_references {
            self.aliases.insert((owner, prev.clone()), real.to_string());
        }
        by_ref.insert(real.to_string(), merged);
        info!("🧾 Reconciled deposit {} → {} for {}", placeholder, real, owner);
        true
    }

    /// Follows placeholder aliases to the current reference.
    pub fn resolve(&self, owner: Address, reference: &str) -> Option<&Deposit> {
        let by_ref = self.deposits.get(&owner)?;
        if let Some(d) = by_ref.get(reference) {
            return Some(d);
        }
        let real = self.aliases.get(&(owner, reference.to_string()))?;
        by_ref.get(real)
    }

    pub fn by_tx_reference(&self, owner: Address, tx_reference: &str) -> Option<&Deposit> {
        self.deposits.get(&owner)?.get(tx_reference)
    }

    pub fn deposits_of(&self, owner: Address) -> Vec<Deposit> {
        let mut out: Vec<Deposit> = self
            .deposits
            .get(&owner)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub fn all_owners(&self) -> BTreeSet<Address> {
        self.deposits
            .iter()
            .filter(|(_, m)| !m.is_empty())
            .map(|(owner, _)| *owner)
            .collect()
    }

    fn spendable(&self, owner: Address, token: Address) -> impl Iterator<Item = &Deposit> {
        self.deposits
            .get(&owner)
            .into_iter()
            .flat_map(|m| m.values())
            .filter(move |d| d.token_address == token && d.status.is_spendable())
    }

    /// Exact sum of remaining balances over spendable deposits.
    pub fn total_balance(&self, owner: Address, token: Address) -> Result<Amount, LedgerError> {
        self.spendable(owner, token)
            .try_fold(Amount::ZERO, |acc, d| acc.checked_add(d.remaining()))
            .ok_or(LedgerError::Overflow { owner })
    }

    /// Best-fit selection. Ties on balance resolve to the lowest reference.
    pub fn select_optimal(&self, owner: Address, token: Address, required: Amount) -> Option<Deposit> {
        self.spendable(owner, token)
            .filter(|d| d.remaining() >= required)
            .min_by(|a, b| {
                a.remaining()
                    .cmp(&b.remaining())
                    .then_with(|| a.tx_reference.cmp(&b.tx_reference))
            })
            .cloned()
    }

    pub fn mark_status(
        &mut self,
        owner: Address,
        tx_reference: &str,
        status: DepositStatus,
        remaining: Option<Amount>,
    ) -> Result<(), LedgerError> {
        let deposit = self
            .deposits
            .get_mut(&owner)
            .and_then(|m| m.get_mut(tx_reference))
            .ok_or_else(|| LedgerError::NotFound {
                owner,
                tx_reference: tx_reference.to_string(),
            })?;
        if let Some(r) = remaining {
            if r > deposit.amount {
                return Err(LedgerError::RemainingAboveAmount {
                    remaining: r,
                    amount: deposit.amount,
                });
            }
            deposit.remaining_balance = Some(r);
        }
        deposit.status = status;
        Ok(())
    }

    /// Deducts `amount` from the deposit's remaining balance and moves it to
    /// `partially_used`, or `exhausted` once nothing is left.
    pub fn consume(
        &mut self,
        owner: Address,
        tx_reference: &str,
        amount: Amount,
    ) -> Result<Deposit, LedgerError> {
        let deposit = self
            .deposits
            .get_mut(&owner)
            .and_then(|m| m.get_mut(tx_reference))
            .ok_or_else(|| LedgerError::NotFound {
                owner,
                tx_reference: tx_reference.to_string(),
            })?;
        let available = deposit.remaining();
        let left = available
            .checked_sub(amount)
            .ok_or_else(|| LedgerError::InsufficientBalance {
                tx_reference: tx_reference.to_string(),
                available,
                requested: amount,
            })?;
        deposit.remaining_balance = Some(left);
        deposit.status = if left.is_zero() {
            DepositStatus::Exhausted
        } else {
            DepositStatus::PartiallyUsed
        };
        debug!(
            "🧾 Consumed {} from {} → remaining={} status={:?}",
            amount, tx_reference, left, deposit.status
        );
        Ok(deposit.clone())
    }

    /// Retention helper: drops exhausted deposits created before `cutoff`.
    pub fn prune_exhausted(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut pruned = 0;
        for by_ref in self.deposits.values_mut() {
            let before = by_ref.len();
            by_ref.retain(|_, d| !(d.status == DepositStatus::Exhausted && d.created_at < cutoff));
            pruned += before - by_ref.len();
        }
        self.deposits.retain(|_, m| !m.is_empty());
        if pruned > 0 {
            warn!("🧾 Pruned {} exhausted deposit(s) older than {}", pruned, cutoff);
        }
        pruned
    }

    pub fn snapshot(&self) -> Vec<Deposit> {
        let mut all: Vec<Deposit> = self
            .deposits
            .values()
            .flat_map(|m| m.values().cloned())
            .collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.tx_reference.cmp(&b.tx_reference))
        });
        all
    }

    pub fn len(&self) -> usize {
        self.deposits.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
