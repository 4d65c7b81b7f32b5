use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, StoreId};

use crate::level::StockKey;

/// Whether a write may drive a level below zero.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeStockPolicy {
    /// Outbound changes that would end below zero are rejected.
    #[default]
    Reject,
    /// Oversell/backorder: levels may go negative.
    Allow,
}

/// Stock policy: a default plus stores that are allowed to backorder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPolicy {
    default: NegativeStockPolicy,
    backorder_stores: BTreeSet<StoreId>,
}

impl StockPolicy {
    pub fn new(default: NegativeStockPolicy) -> Self {
        Self {
            default,
            backorder_stores: BTreeSet::new(),
        }
    }

    pub fn non_negative() -> Self {
        Self::new(NegativeStockPolicy::Reject)
    }

    pub fn allow_negative() -> Self {
        Self::new(NegativeStockPolicy::Allow)
    }

    pub fn with_backorder_store(mut self, store_id: StoreId) -> Self {
        self.backorder_stores.insert(store_id);
        self
    }

    pub fn default_policy(&self) -> NegativeStockPolicy {
        self.default
    }

    pub fn backorder_stores(&self) -> impl Iterator<Item = StoreId> + '_ {
        self.backorder_stores.iter().copied()
    }

    pub fn policy_for(&self, store_id: StoreId) -> NegativeStockPolicy {
        if self.backorder_stores.contains(&store_id) {
            NegativeStockPolicy::Allow
        } else {
            self.default
        }
    }

    /// Check a change against the current level and return the resulting quantity.
    ///
    /// Inbound changes always pass (they can only improve a negative level).
    pub fn check(&self, key: StockKey, available: i64, delta: i64) -> DomainResult<i64> {
        let resulting = available
            .checked_add(delta)
            .ok_or_else(|| DomainError::validation("stock quantity overflow"))?;

        if delta < 0
            && resulting < 0
            && self.policy_for(key.store_id) == NegativeStockPolicy::Reject
        {
            return Err(DomainError::InsufficientStock {
                store_id: key.store_id,
                variant_id: key.variant_id,
                available,
                requested: delta.saturating_neg(),
            });
        }

        Ok(resulting)
    }
}
