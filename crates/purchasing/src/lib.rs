//! Purchasing domain module (Purchase Orders, event-sourced).
//!
//! This crate contains business rules for purchase orders, implemented purely as
//! deterministic domain logic (no IO, no storage). Receipts emit `ItemsReceived`, which
//! the infrastructure layer turns into ledger movements.

pub mod number;
pub mod order;

pub use number::PoNumber;
pub use order::{
    AddItem, CancelPurchaseOrder, CreatePurchaseOrder, ItemAdded, ItemRemoved, ItemUpdated,
    ItemsReceived, NewPurchaseOrderItem, PurchaseOrder, PurchaseOrderCancelled,
    PurchaseOrderCommand, PurchaseOrderCreated, PurchaseOrderEvent, PurchaseOrderItem,
    PurchaseOrderStatus, ReceiptLine, ReceiveItems, ReceivedLine, RemoveItem, UpdateItem,
    derive_status,
};
