use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, Event};
use stockledger_infra::{
    LevelDrift, MovementQueryResult, PurchaseOrderPage, RebuildReport, RecordedPurchaseOrderEvent,
};
use stockledger_inventory::{StockLevel, StockMovement};
use stockledger_purchasing::{PurchaseOrder, PurchaseOrderItem};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseOrderItemRequest {
    pub product_variant_id: String,
    pub quantity_ordered: i64,
    pub unit_cost_cents: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePurchaseOrderRequest {
    pub store_id: String,
    pub supplier_name: String,
    pub items: Vec<PurchaseOrderItemRequest>,
    pub created_by: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddPurchaseOrderItemRequest {
    #[serde(flatten)]
    pub item: PurchaseOrderItemRequest,
    pub updated_by: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePurchaseOrderItemRequest {
    pub quantity_ordered: Option<i64>,
    pub unit_cost_cents: Option<i64>,
    pub updated_by: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiveLineRequest {
    pub item_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiveItemsRequest {
    pub lines: Vec<ReceiveLineRequest>,
    pub received_by: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelPurchaseOrderRequest {
    pub cancelled_by: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdjustStockRequest {
    pub store_id: String,
    pub product_variant_id: String,
    pub change_quantity: i64,
    pub reason: String,
    pub note: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StockCountRequest {
    pub store_id: String,
    pub product_variant_id: String,
    pub counted_quantity: i64,
    pub note: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReverseMovementRequest {
    pub note: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MovementQueryRequest {
    pub store_id: Option<String>,
    pub product_variant_id: Option<String>,
    /// Inclusive.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive.
    pub to: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub purchase_order_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PurchaseOrderListRequest {
    pub store_id: Option<String>,
    pub status: Option<String>,
    pub supplier: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Parse an id field, naming the field on failure.
pub fn parse_id<T>(field: &'static str, raw: &str) -> Result<T, DomainError>
where
    T: core::str::FromStr<Err = DomainError>,
{
    raw.trim()
        .parse()
        .map_err(|e| DomainError::invalid_id(format!("{field}: {e}")))
}

pub fn parse_opt_id<T>(field: &'static str, raw: Option<&str>) -> Result<Option<T>, DomainError>
where
    T: core::str::FromStr<Err = DomainError>,
{
    raw.map(|r| parse_id(field, r)).transpose()
}

// -------------------------
// Views
// -------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementView {
    pub id: String,
    pub sequence: u64,
    pub store_id: String,
    pub product_variant_id: String,
    pub change_quantity: i64,
    pub reason: String,
    pub purchase_order_id: Option<String>,
    pub purchase_order_item_id: Option<String>,
    pub reverses: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl From<&StockMovement> for MovementView {
    fn from(m: &StockMovement) -> Self {
        Self {
            id: m.id().to_string(),
            sequence: m.sequence(),
            store_id: m.store_id().to_string(),
            product_variant_id: m.variant_id().to_string(),
            change_quantity: m.change_quantity(),
            reason: m.reason().to_string(),
            purchase_order_id: m.purchase_order_id().map(|id| id.to_string()),
            purchase_order_item_id: m.purchase_order_item_id().map(|id| id.to_string()),
            reverses: m.reverses().map(|id| id.to_string()),
            note: m.note().map(str::to_string),
            created_at: m.created_at(),
            created_by: m.created_by().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPageView {
    pub movements: Vec<MovementView>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
}

impl From<MovementQueryResult> for MovementPageView {
    fn from(r: MovementQueryResult) -> Self {
        Self {
            movements: r.movements.iter().map(MovementView::from).collect(),
            total: r.total,
            limit: r.pagination.limit,
            offset: r.pagination.offset,
            has_more: r.has_more,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevelView {
    pub store_id: String,
    pub product_variant_id: String,
    pub quantity: i64,
    pub version: u64,
    pub last_sequence: u64,
}

impl From<&StockLevel> for StockLevelView {
    fn from(l: &StockLevel) -> Self {
        let key = l.key();
        Self {
            store_id: key.store_id.to_string(),
            product_variant_id: key.variant_id.to_string(),
            quantity: l.quantity(),
            version: l.version(),
            last_sequence: l.last_sequence(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStockView {
    pub store_id: String,
    pub total_units: i64,
    pub levels: Vec<StockLevelView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderItemView {
    pub id: String,
    pub product_variant_id: String,
    pub quantity_ordered: i64,
    pub quantity_received: i64,
    pub outstanding: i64,
    pub unit_cost_cents: i64,
    pub line_total_cents: Option<i64>,
}

impl From<&PurchaseOrderItem> for PurchaseOrderItemView {
    fn from(i: &PurchaseOrderItem) -> Self {
        Self {
            id: i.id.to_string(),
            product_variant_id: i.variant_id.to_string(),
            quantity_ordered: i.quantity_ordered,
            quantity_received: i.quantity_received,
            outstanding: i.outstanding(),
            unit_cost_cents: i.unit_cost_cents,
            line_total_cents: i.line_total_cents(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderView {
    pub id: String,
    pub po_number: String,
    pub store_id: String,
    pub supplier_name: String,
    pub status: String,
    pub items: Vec<PurchaseOrderItemView>,
    pub total_cost_cents: i64,
    pub total_ordered: i64,
    pub total_received: i64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub version: u64,
}

impl From<&PurchaseOrder> for PurchaseOrderView {
    fn from(o: &PurchaseOrder) -> Self {
        use stockledger_core::AggregateRoot;

        Self {
            id: o.id_typed().to_string(),
            po_number: o.po_number().to_string(),
            store_id: o.store_id().to_string(),
            supplier_name: o.supplier_name().to_string(),
            status: o.status().to_string(),
            items: o.items().iter().map(PurchaseOrderItemView::from).collect(),
            total_cost_cents: o.total_cost_cents(),
            total_ordered: o.total_ordered(),
            total_received: o.total_received(),
            created_at: o.created_at(),
            created_by: o.created_by().to_string(),
            cancelled_at: o.cancelled_at(),
            cancellation_reason: o.cancellation_reason().map(str::to_string),
            version: o.version(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderPageView {
    /// Newest first.
    pub orders: Vec<PurchaseOrderView>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
}

impl From<PurchaseOrderPage> for PurchaseOrderPageView {
    fn from(p: PurchaseOrderPage) -> Self {
        Self {
            orders: p.orders.iter().map(PurchaseOrderView::from).collect(),
            total: p.total,
            limit: p.pagination.limit,
            offset: p.pagination.offset,
            has_more: p.has_more,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderEventView {
    pub sequence: u64,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub actor: String,
    pub payload: serde_json::Value,
}

impl From<&RecordedPurchaseOrderEvent> for PurchaseOrderEventView {
    fn from(r: &RecordedPurchaseOrderEvent) -> Self {
        Self {
            sequence: r.sequence,
            event_type: r.event.event_type().to_string(),
            occurred_at: r.occurred_at,
            actor: r.event.actor().to_string(),
            payload: serde_json::to_value(&r.event).unwrap_or(serde_json::Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptView {
    pub order: PurchaseOrderView,
    pub movements: Vec<MovementView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftView {
    pub store_id: String,
    pub product_variant_id: String,
    pub ledger_quantity: i64,
    pub projected_quantity: i64,
}

impl From<&LevelDrift> for DriftView {
    fn from(d: &LevelDrift) -> Self {
        Self {
            store_id: d.key.store_id.to_string(),
            product_variant_id: d.key.variant_id.to_string(),
            ledger_quantity: d.ledger_quantity,
            projected_quantity: d.projected_quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReportView {
    pub scanned: usize,
    pub rewritten: usize,
    pub drifts: Vec<DriftView>,
}

impl From<&RebuildReport> for RebuildReportView {
    fn from(r: &RebuildReport) -> Self {
        Self {
            scanned: r.scanned,
            rewritten: r.rewritten,
            drifts: r.drifts.iter().map(DriftView::from).collect(),
        }
    }
}
