//! Inventory domain module (stock ledger).
//!
//! This crate contains the business rules for stock movements and levels, implemented
//! purely as deterministic domain logic (no IO, no storage). The ledger itself lives in
//! the infrastructure layer; this crate decides what may be appended to it.

pub mod adjustment;
pub mod level;
pub mod movement;
pub mod policy;

pub use adjustment::{AdjustStock, RecordStockCount, ReverseMovement};
pub use level::{LedgerTotal, StockKey, StockLevel, fold_movements};
pub use movement::{MovementReason, NewMovement, StockMovement};
pub use policy::{NegativeStockPolicy, StockPolicy};
