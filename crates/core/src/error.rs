//! Domain error model.

use thiserror::Error;

use crate::id::{ProductVariantId, PurchaseOrderItemId, StoreId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Covers deterministic business failures (validation, receipt bounds, stock policy,
/// illegal transitions) plus the two ledger-wide conditions callers must react to:
/// retryable concurrent modification and fatal ledger/level inconsistency.
/// Storage failures belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input (empty item list, zero quantity, negative cost, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A receipt would push `quantity_received` above `quantity_ordered`.
    #[error(
        "over-receipt on item {item_id}: ordered {ordered}, already received {received}, requested {requested}"
    )]
    OverReceipt {
        item_id: PurchaseOrderItemId,
        ordered: i64,
        received: i64,
        requested: i64,
    },

    /// An outbound change would drive a level below zero under the non-negative policy.
    #[error(
        "insufficient stock for variant {variant_id} at store {store_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        store_id: StoreId,
        variant_id: ProductVariantId,
        available: i64,
        requested: i64,
    },

    /// Unknown purchase order, item or movement reference.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The operation is not allowed in the current state (e.g. receiving a closed order).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Optimistic-lock / compare-and-swap conflict. Safe to retry.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// The projected level disagrees with the ledger. Requires operator attention.
    #[error(
        "ledger/level mismatch for variant {variant_id} at store {store_id}: ledger {ledger_quantity}, projected {projected_quantity}"
    )]
    Consistency {
        store_id: StoreId,
        variant_id: ProductVariantId,
        ledger_quantity: i64,
        projected_quantity: i64,
    },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::ConcurrentModification(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl core::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Only concurrency conflicts are worth retrying; everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}
