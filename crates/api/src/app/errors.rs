use serde_json::json;
use thiserror::Error;

use stockledger_core::DomainError;
use stockledger_infra::{ConfigError, InventoryError, SnapshotError, StoreError};

/// Error returned by every [`InventoryApp`](crate::app::InventoryApp) operation.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("worker spawn failed: {0}")]
    Worker(#[from] std::io::Error),
}

impl From<DomainError> for ApiError {
    fn from(value: DomainError) -> Self {
        ApiError::Inventory(InventoryError::Domain(value))
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        ApiError::Inventory(value.into())
    }
}

impl ApiError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ApiError::Inventory(e) => e.domain(),
            _ => None,
        }
    }

    /// Safe to retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Inventory(e) if e.is_retryable())
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Inventory(InventoryError::Domain(e)) => match e {
                DomainError::Validation(_) => "validation_error",
                DomainError::OverReceipt { .. } => "over_receipt",
                DomainError::InsufficientStock { .. } => "insufficient_stock",
                DomainError::NotFound { .. } => "not_found",
                DomainError::InvariantViolation(_) => "invariant_violation",
                DomainError::ConcurrentModification(_) => "conflict",
                DomainError::Consistency { .. } => "consistency_error",
                DomainError::InvalidId(_) => "invalid_id",
            },
            ApiError::Inventory(InventoryError::Storage(_)) => "storage_error",
            ApiError::Snapshot(_) => "snapshot_error",
            ApiError::Config(_) => "config_error",
            ApiError::Worker(_) => "worker_error",
        }
    }

    /// Error body: `{ "error": code, "message": ..., "details": {...}? }`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });

        let details = match self.domain() {
            Some(DomainError::OverReceipt {
                item_id,
                ordered,
                received,
                requested,
            }) => Some(json!({
                "item_id": item_id.to_string(),
                "ordered": ordered,
                "received": received,
                "requested": requested,
            })),
            Some(DomainError::InsufficientStock {
                store_id,
                variant_id,
                available,
                requested,
            }) => Some(json!({
                "store_id": store_id.to_string(),
                "product_variant_id": variant_id.to_string(),
                "available": available,
                "requested": requested,
            })),
            Some(DomainError::Consistency {
                store_id,
                variant_id,
                ledger_quantity,
                projected_quantity,
            }) => Some(json!({
                "store_id": store_id.to_string(),
                "product_variant_id": variant_id.to_string(),
                "ledger_quantity": ledger_quantity,
                "projected_quantity": projected_quantity,
            })),
            _ => None,
        };
        if let Some(details) = details {
            body["details"] = details;
        }
        body
    }
}
