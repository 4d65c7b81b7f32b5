//! Purchase order persistence (event streams + current state + PO number sequence).

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryPurchaseOrderRepository;
pub use r#trait::{
    PurchaseOrderExport, PurchaseOrderFilter, PurchaseOrderPage, PurchaseOrderRepository,
    RecordedPurchaseOrderEvent,
};
