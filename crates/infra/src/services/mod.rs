//! Write-side services. Each operation plans against a read of the current state and
//! commits through the [`LedgerWriter`](crate::writer::LedgerWriter); stale plans are
//! rejected by the commit's version checks and re-planned here.

pub mod adjustments;
pub mod purchase_orders;

pub use adjustments::StockAdjustmentService;
pub use purchase_orders::{OrderLine, PurchaseOrderManager, ReceiptOutcome};

use tracing::{debug, warn};

use stockledger_core::DomainError;

use crate::error::{InventoryError, StoreError};

/// Run `attempt` until it succeeds, fails for a reason other than a conflict, or
/// `max_retries` re-plans have been spent.
pub(crate) fn with_retries<T>(
    operation: &'static str,
    max_retries: u32,
    mut attempt: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, InventoryError> {
    let mut retries = 0u32;
    loop {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_conflict() && retries < max_retries => {
                retries += 1;
                debug!(operation, retry = retries, error = %err, "write conflict; re-planning");
            }
            Err(err) if err.is_conflict() => {
                warn!(operation, retries, error = %err, "write conflict; retries exhausted");
                return Err(DomainError::conflict(format!(
                    "{operation} gave up after {} attempts: {err}",
                    retries + 1
                ))
                .into());
            }
            Err(err) => return Err(err.into()),
        }
    }
}
