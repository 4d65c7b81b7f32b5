//! Infrastructure error model.

use thiserror::Error;

use stockledger_core::DomainError;

/// Storage/commit operation error.
///
/// These are **infrastructure errors** (concurrency, integrity, lock health) wrapping the
/// domain errors a commit can reject a batch with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The batch broke a business rule (validation, stock policy, reversal rules, ...).
    #[error(transparent)]
    Rejected(DomainError),

    /// Optimistic concurrency check failed; reload and retry.
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    /// An identifier that must be unique already exists.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// A lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),

    /// Persisted state failed an integrity check (e.g. a tampered snapshot).
    #[error("corrupt state: {0}")]
    Corrupt(String),

    /// The commit journal could not be read or written.
    #[error("journal I/O failure: {0}")]
    Io(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<DomainError> for StoreError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::ConcurrentModification(msg) => StoreError::Conflict(msg),
            other => StoreError::Rejected(other),
        }
    }
}

/// Error surfaced by the inventory services.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl InventoryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            InventoryError::Domain(e) => e.is_retryable(),
            InventoryError::Storage(_) => false,
        }
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            InventoryError::Domain(e) => Some(e),
            InventoryError::Storage(_) => None,
        }
    }
}

impl From<StoreError> for InventoryError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Rejected(e) => InventoryError::Domain(e),
            StoreError::Conflict(msg) => InventoryError::Domain(DomainError::conflict(msg)),
            other => InventoryError::Storage(other.to_string()),
        }
    }
}
