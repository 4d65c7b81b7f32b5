use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    Aggregate, AggregateRoot, DomainError, Event, ProductVariantId, PurchaseOrderId,
    PurchaseOrderItemId, StoreId, UserId,
};

use crate::number::PoNumber;

/// Purchase order status lifecycle.
///
/// Never stored: derived from item receipt progress and the cancellation timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Open,
    PartiallyReceived,
    Closed,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::PartiallyReceived => "PARTIALLY_RECEIVED",
            Self::Closed => "CLOSED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
            "OPEN" => Ok(Self::Open),
            "PARTIALLY_RECEIVED" => Ok(Self::PartiallyReceived),
            "CLOSED" => Ok(Self::Closed),
            "CANCELLED" | "CANCELED" => Ok(Self::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown purchase order status: {other}"
            ))),
        }
    }
}

/// Status as a pure function of receipt progress.
///
/// Cancellation wins over everything; otherwise nothing received is `Open`, everything
/// received is `Closed`, anything in between is `PartiallyReceived`.
pub fn derive_status(items: &[PurchaseOrderItem], cancelled: bool) -> PurchaseOrderStatus {
    if cancelled {
        return PurchaseOrderStatus::Cancelled;
    }
    if items.is_empty() || items.iter().all(|i| i.quantity_received == 0) {
        return PurchaseOrderStatus::Open;
    }
    if items.iter().all(PurchaseOrderItem::is_fully_received) {
        PurchaseOrderStatus::Closed
    } else {
        PurchaseOrderStatus::PartiallyReceived
    }
}

/// Purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderItem {
    pub id: PurchaseOrderItemId,
    pub variant_id: ProductVariantId,
    pub quantity_ordered: i64,
    /// Monotonically non-decreasing, never above `quantity_ordered`.
    pub quantity_received: i64,
    pub unit_cost_cents: i64,
}

impl PurchaseOrderItem {
    pub fn outstanding(&self) -> i64 {
        self.quantity_ordered - self.quantity_received
    }

    pub fn is_fully_received(&self) -> bool {
        self.quantity_received >= self.quantity_ordered
    }

    pub fn line_total_cents(&self) -> Option<i64> {
        self.quantity_ordered.checked_mul(self.unit_cost_cents)
    }
}

/// Item as supplied by a caller creating or extending an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrderItem {
    pub item_id: PurchaseOrderItemId,
    pub variant_id: ProductVariantId,
    pub quantity_ordered: i64,
    pub unit_cost_cents: i64,
}

impl NewPurchaseOrderItem {
    /// Line with a freshly generated item id.
    pub fn new(variant_id: ProductVariantId, quantity_ordered: i64, unit_cost_cents: i64) -> Self {
        Self {
            item_id: PurchaseOrderItemId::new(),
            variant_id,
            quantity_ordered,
            unit_cost_cents,
        }
    }

    fn into_item(self) -> PurchaseOrderItem {
        PurchaseOrderItem {
            id: self.item_id,
            variant_id: self.variant_id,
            quantity_ordered: self.quantity_ordered,
            quantity_received: 0,
            unit_cost_cents: self.unit_cost_cents,
        }
    }
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    po_number: PoNumber,
    store_id: StoreId,
    supplier_name: String,
    items: Vec<PurchaseOrderItem>,
    created_at: DateTime<Utc>,
    created_by: UserId,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            po_number: PoNumber::default(),
            store_id: StoreId::default(),
            supplier_name: String::new(),
            items: Vec::new(),
            created_at: DateTime::<Utc>::default(),
            created_by: UserId::default(),
            cancelled_at: None,
            cancellation_reason: None,
            version: 0,
            created: false,
        }
    }

    /// Fold an event history into state.
    pub fn rehydrate<'a>(
        id: PurchaseOrderId,
        events: impl IntoIterator<Item = &'a PurchaseOrderEvent>,
    ) -> Self {
        let mut order = Self::empty(id);
        for event in events {
            order.apply(event);
        }
        order
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn po_number(&self) -> &PoNumber {
        &self.po_number
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    pub fn supplier_name(&self) -> &str {
        &self.supplier_name
    }

    pub fn items(&self) -> &[PurchaseOrderItem] {
        &self.items
    }

    pub fn item(&self, item_id: PurchaseOrderItemId) -> Option<&PurchaseOrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        derive_status(&self.items, self.cancelled_at.is_some())
    }

    /// Σ quantity_ordered × unit_cost_cents, recomputed on every read.
    ///
    /// Writes that would overflow are rejected, so saturation is never observed for
    /// orders built through `handle`.
    pub fn total_cost_cents(&self) -> i64 {
        self.items
            .iter()
            .map(|i| i.quantity_ordered.saturating_mul(i.unit_cost_cents))
            .fold(0i64, i64::saturating_add)
    }

    /// Saturating for the same reason as [`total_cost_cents`](Self::total_cost_cents).
    pub fn total_ordered(&self) -> i64 {
        self.items
            .iter()
            .map(|i| i.quantity_ordered)
            .fold(0i64, i64::saturating_add)
    }

    pub fn total_received(&self) -> i64 {
        self.items
            .iter()
            .map(|i| i.quantity_received)
            .fold(0i64, i64::saturating_add)
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub po_number: PoNumber,
    pub store_id: StoreId,
    pub supplier_name: String,
    pub items: Vec<NewPurchaseOrderItem>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl CreatePurchaseOrder {
    /// Everything that can be checked without the aggregate's state.
    ///
    /// The repository runs this before allocating a PO number so rejected drafts never
    /// consume one.
    pub fn validate_draft(
        store_id: StoreId,
        supplier_name: &str,
        items: &[NewPurchaseOrderItem],
        created_by: UserId,
    ) -> Result<(), DomainError> {
        if store_id.is_nil() {
            return Err(DomainError::validation("store_id is required"));
        }
        if created_by.is_nil() {
            return Err(DomainError::validation("created_by is required"));
        }
        if supplier_name.trim().is_empty() {
            return Err(DomainError::validation("supplier_name cannot be empty"));
        }
        if items.is_empty() {
            return Err(DomainError::validation(
                "purchase order must have at least one item",
            ));
        }

        let mut variants = BTreeSet::new();
        let mut item_ids = BTreeSet::new();
        let mut totals = LineTotals::default();
        for item in items {
            validate_item_values(item.variant_id, item.quantity_ordered, item.unit_cost_cents)?;
            if item.item_id.is_nil() || !item_ids.insert(item.item_id) {
                return Err(DomainError::validation("item ids must be present and unique"));
            }
            if !variants.insert(item.variant_id) {
                return Err(DomainError::validation(format!(
                    "product variant {} appears more than once",
                    item.variant_id
                )));
            }
            totals = totals.add(item.quantity_ordered, item.unit_cost_cents)?;
        }
        Ok(())
    }
}

/// Command: AddItem (only while OPEN).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub order_id: PurchaseOrderId,
    pub item: NewPurchaseOrderItem,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateItem (only while OPEN). `None` keeps the current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateItem {
    pub order_id: PurchaseOrderId,
    pub item_id: PurchaseOrderItemId,
    pub quantity_ordered: Option<i64>,
    pub unit_cost_cents: Option<i64>,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem (only while OPEN; at least one item must remain).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub order_id: PurchaseOrderId,
    pub item_id: PurchaseOrderItemId,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// One requested receipt line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub item_id: PurchaseOrderItemId,
    pub quantity: i64,
}

/// Command: ReceiveItems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveItems {
    pub order_id: PurchaseOrderId,
    pub lines: Vec<ReceiptLine>,
    pub received_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelPurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    Create(CreatePurchaseOrder),
    AddItem(AddItem),
    UpdateItem(UpdateItem),
    RemoveItem(RemoveItem),
    ReceiveItems(ReceiveItems),
    Cancel(CancelPurchaseOrder),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub order_id: PurchaseOrderId,
    pub po_number: PoNumber,
    pub store_id: StoreId,
    pub supplier_name: String,
    pub items: Vec<PurchaseOrderItem>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub order_id: PurchaseOrderId,
    pub item: PurchaseOrderItem,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemUpdated (carries the resulting values).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdated {
    pub order_id: PurchaseOrderId,
    pub item_id: PurchaseOrderItemId,
    pub quantity_ordered: i64,
    pub unit_cost_cents: i64,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub order_id: PurchaseOrderId,
    pub item_id: PurchaseOrderItemId,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// A receipt line resolved against the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedLine {
    pub item_id: PurchaseOrderItemId,
    pub variant_id: ProductVariantId,
    pub quantity: i64,
}

/// Event: ItemsReceived.
///
/// Integrates with inventory by carrying the store, variant and quantity of every line;
/// the infrastructure layer turns each line into one `PURCHASE_RECEIPT` ledger movement
/// in the same commit that saves this event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsReceived {
    pub order_id: PurchaseOrderId,
    pub store_id: StoreId,
    pub lines: Vec<ReceivedLine>,
    pub received_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCancelled {
    pub order_id: PurchaseOrderId,
    pub reason: Option<String>,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    Created(PurchaseOrderCreated),
    ItemAdded(ItemAdded),
    ItemUpdated(ItemUpdated),
    ItemRemoved(ItemRemoved),
    ItemsReceived(ItemsReceived),
    Cancelled(PurchaseOrderCancelled),
}

impl PurchaseOrderEvent {
    pub fn order_id(&self) -> PurchaseOrderId {
        match self {
            PurchaseOrderEvent::Created(e) => e.order_id,
            PurchaseOrderEvent::ItemAdded(e) => e.order_id,
            PurchaseOrderEvent::ItemUpdated(e) => e.order_id,
            PurchaseOrderEvent::ItemRemoved(e) => e.order_id,
            PurchaseOrderEvent::ItemsReceived(e) => e.order_id,
            PurchaseOrderEvent::Cancelled(e) => e.order_id,
        }
    }

    pub fn actor(&self) -> UserId {
        match self {
            PurchaseOrderEvent::Created(e) => e.created_by,
            PurchaseOrderEvent::ItemAdded(e) => e.updated_by,
            PurchaseOrderEvent::ItemUpdated(e) => e.updated_by,
            PurchaseOrderEvent::ItemRemoved(e) => e.updated_by,
            PurchaseOrderEvent::ItemsReceived(e) => e.received_by,
            PurchaseOrderEvent::Cancelled(e) => e.cancelled_by,
        }
    }
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::Created(_) => "purchasing.order.created",
            PurchaseOrderEvent::ItemAdded(_) => "purchasing.order.item_added",
            PurchaseOrderEvent::ItemUpdated(_) => "purchasing.order.item_updated",
            PurchaseOrderEvent::ItemRemoved(_) => "purchasing.order.item_removed",
            PurchaseOrderEvent::ItemsReceived(_) => "purchasing.order.items_received",
            PurchaseOrderEvent::Cancelled(_) => "purchasing.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::Created(e) => e.occurred_at,
            PurchaseOrderEvent::ItemAdded(e) => e.occurred_at,
            PurchaseOrderEvent::ItemUpdated(e) => e.occurred_at,
            PurchaseOrderEvent::ItemRemoved(e) => e.occurred_at,
            PurchaseOrderEvent::ItemsReceived(e) => e.occurred_at,
            PurchaseOrderEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::Created(e) => {
                self.id = e.order_id;
                self.po_number = e.po_number.clone();
                self.store_id = e.store_id;
                self.supplier_name = e.supplier_name.clone();
                self.items = e.items.clone();
                self.created_at = e.occurred_at;
                self.created_by = e.created_by;
                self.created = true;
            }
            PurchaseOrderEvent::ItemAdded(e) => {
                self.items.push(e.item.clone());
            }
            PurchaseOrderEvent::ItemUpdated(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == e.item_id) {
                    item.quantity_ordered = e.quantity_ordered;
                    item.unit_cost_cents = e.unit_cost_cents;
                }
            }
            PurchaseOrderEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.id != e.item_id);
            }
            PurchaseOrderEvent::ItemsReceived(e) => {
                for line in &e.lines {
                    if let Some(item) = self.items.iter_mut().find(|i| i.id == line.item_id) {
                        item.quantity_received += line.quantity;
                    }
                }
            }
            PurchaseOrderEvent::Cancelled(e) => {
                self.cancelled_at = Some(e.occurred_at);
                self.cancellation_reason = e.reason.clone();
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::Create(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::AddItem(cmd) => self.handle_add_item(cmd),
            PurchaseOrderCommand::UpdateItem(cmd) => self.handle_update_item(cmd),
            PurchaseOrderCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            PurchaseOrderCommand::ReceiveItems(cmd) => self.handle_receive(cmd),
            PurchaseOrderCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

fn validate_item_values(
    variant_id: ProductVariantId,
    quantity_ordered: i64,
    unit_cost_cents: i64,
) -> Result<(), DomainError> {
    if variant_id.is_nil() {
        return Err(DomainError::validation("product_variant_id is required"));
    }
    if quantity_ordered <= 0 {
        return Err(DomainError::validation("quantity_ordered must be positive"));
    }
    if unit_cost_cents < 0 {
        return Err(DomainError::validation("unit_cost_cents cannot be negative"));
    }
    Ok(())
}

/// Running Σ quantity_ordered and Σ line cost; an order whose totals do not fit in `i64`
/// is rejected.
#[derive(Debug, Default, Clone, Copy)]
struct LineTotals {
    quantity: i64,
    cost_cents: i64,
}

impl LineTotals {
    fn add(self, quantity: i64, unit_cost_cents: i64) -> Result<Self, DomainError> {
        let quantity_total = self
            .quantity
            .checked_add(quantity)
            .ok_or_else(|| DomainError::validation("purchase order quantity total overflows"))?;
        let cost_cents = quantity
            .checked_mul(unit_cost_cents)
            .and_then(|line| self.cost_cents.checked_add(line))
            .ok_or_else(|| DomainError::validation("purchase order total overflows"))?;
        Ok(Self {
            quantity: quantity_total,
            cost_cents,
        })
    }
}

impl PurchaseOrder {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("purchase_order", self.id));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_editable(&self) -> Result<(), DomainError> {
        let status = self.status();
        if status != PurchaseOrderStatus::Open {
            return Err(DomainError::invariant(format!(
                "items can only be edited while the purchase order is OPEN (status: {status})"
            )));
        }
        Ok(())
    }

    fn find_item(&self, item_id: PurchaseOrderItemId) -> Result<&PurchaseOrderItem, DomainError> {
        self.item(item_id)
            .ok_or_else(|| DomainError::not_found("purchase_order_item", item_id))
    }

    fn ensure_total_fits(&self, replace: Option<&PurchaseOrderItem>) -> Result<(), DomainError> {
        let mut totals = LineTotals::default();
        for item in &self.items {
            let effective = match replace {
                Some(r) if r.id == item.id => r,
                _ => item,
            };
            totals = totals.add(effective.quantity_ordered, effective.unit_cost_cents)?;
        }
        if let Some(r) = replace {
            if self.item(r.id).is_none() {
                totals.add(r.quantity_ordered, r.unit_cost_cents)?;
            }
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invariant("purchase order already exists"));
        }
        self.ensure_order_id(cmd.order_id)?;
        if cmd.po_number.is_empty() {
            return Err(DomainError::validation("po_number is required"));
        }
        CreatePurchaseOrder::validate_draft(
            cmd.store_id,
            &cmd.supplier_name,
            &cmd.items,
            cmd.created_by,
        )?;

        Ok(vec![PurchaseOrderEvent::Created(PurchaseOrderCreated {
            order_id: cmd.order_id,
            po_number: cmd.po_number.clone(),
            store_id: cmd.store_id,
            supplier_name: cmd.supplier_name.trim().to_string(),
            items: cmd.items.iter().cloned().map(NewPurchaseOrderItem::into_item).collect(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_editable()?;

        let new = &cmd.item;
        validate_item_values(new.variant_id, new.quantity_ordered, new.unit_cost_cents)?;
        if new.item_id.is_nil() || self.item(new.item_id).is_some() {
            return Err(DomainError::validation("item ids must be present and unique"));
        }
        if self.items.iter().any(|i| i.variant_id == new.variant_id) {
            return Err(DomainError::validation(format!(
                "product variant {} is already on this purchase order",
                new.variant_id
            )));
        }

        let item = new.clone().into_item();
        self.ensure_total_fits(Some(&item))?;

        Ok(vec![PurchaseOrderEvent::ItemAdded(ItemAdded {
            order_id: cmd.order_id,
            item,
            updated_by: cmd.updated_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_item(
        &self,
        cmd: &UpdateItem,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_editable()?;

        let current = self.find_item(cmd.item_id)?;
        if cmd.quantity_ordered.is_none() && cmd.unit_cost_cents.is_none() {
            return Err(DomainError::validation("nothing to update"));
        }

        let updated = PurchaseOrderItem {
            quantity_ordered: cmd.quantity_ordered.unwrap_or(current.quantity_ordered),
            unit_cost_cents: cmd.unit_cost_cents.unwrap_or(current.unit_cost_cents),
            ..current.clone()
        };
        validate_item_values(
            updated.variant_id,
            updated.quantity_ordered,
            updated.unit_cost_cents,
        )?;
        self.ensure_total_fits(Some(&updated))?;

        Ok(vec![PurchaseOrderEvent::ItemUpdated(ItemUpdated {
            order_id: cmd.order_id,
            item_id: cmd.item_id,
            quantity_ordered: updated.quantity_ordered,
            unit_cost_cents: updated.unit_cost_cents,
            updated_by: cmd.updated_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(
        &self,
        cmd: &RemoveItem,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_editable()?;
        self.find_item(cmd.item_id)?;

        if self.items.len() == 1 {
            return Err(DomainError::validation(
                "purchase order must keep at least one item",
            ));
        }

        Ok(vec![PurchaseOrderEvent::ItemRemoved(ItemRemoved {
            order_id: cmd.order_id,
            item_id: cmd.item_id,
            updated_by: cmd.updated_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(
        &self,
        cmd: &ReceiveItems,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        let status = self.status();
        if status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "cannot receive items on a {status} purchase order"
            )));
        }
        if cmd.received_by.is_nil() {
            return Err(DomainError::validation("received_by is required"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("receipt must have at least one line"));
        }

        // Lines for the same item are summed before the bound check.
        let mut requested: BTreeMap<PurchaseOrderItemId, i64> = BTreeMap::new();
        let mut lines = Vec::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation("receipt quantity must be positive"));
            }
            let item = self.find_item(line.item_id)?;
            // Saturation is safe: anything near i64::MAX exceeds the outstanding quantity.
            let sum = requested.entry(line.item_id).or_insert(0);
            *sum = sum.saturating_add(line.quantity);
            lines.push(ReceivedLine {
                item_id: item.id,
                variant_id: item.variant_id,
                quantity: line.quantity,
            });
        }

        for (item_id, quantity) in &requested {
            let item = self.find_item(*item_id)?;
            if *quantity > item.outstanding() {
                return Err(DomainError::OverReceipt {
                    item_id: *item_id,
                    ordered: item.quantity_ordered,
                    received: item.quantity_received,
                    requested: *quantity,
                });
            }
        }

        Ok(vec![PurchaseOrderEvent::ItemsReceived(ItemsReceived {
            order_id: cmd.order_id,
            store_id: self.store_id,
            lines,
            received_by: cmd.received_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(
        &self,
        cmd: &CancelPurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        let status = self.status();
        if status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "cannot cancel a {status} purchase order"
            )));
        }
        if cmd.cancelled_by.is_nil() {
            return Err(DomainError::validation("cancelled_by is required"));
        }

        Ok(vec![PurchaseOrderEvent::Cancelled(PurchaseOrderCancelled {
            order_id: cmd.order_id,
            reason: cmd
                .reason
                .as_ref()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            cancelled_by: cmd.cancelled_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn new_item(quantity: i64, unit_cost_cents: i64) -> NewPurchaseOrderItem {
        NewPurchaseOrderItem {
            item_id: PurchaseOrderItemId::new(),
            variant_id: ProductVariantId::new(),
            quantity_ordered: quantity,
            unit_cost_cents,
        }
    }

    fn create_cmd(order_id: PurchaseOrderId, items: Vec<NewPurchaseOrderItem>) -> CreatePurchaseOrder {
        CreatePurchaseOrder {
            order_id,
            po_number: PoNumber::format("PO-", 1),
            store_id: StoreId::new(),
            supplier_name: "Acme Supplies".to_string(),
            items,
            created_by: UserId::new(),
            occurred_at: test_time(),
        }
    }

    fn execute(order: &mut PurchaseOrder, cmd: PurchaseOrderCommand) -> Result<(), DomainError> {
        let events = order.handle(&cmd)?;
        for e in &events {
            order.apply(e);
        }
        Ok(())
    }

    fn created(items: Vec<NewPurchaseOrderItem>) -> PurchaseOrder {
        let order_id = PurchaseOrderId::new();
        let mut order = PurchaseOrder::empty(order_id);
        execute(
            &mut order,
            PurchaseOrderCommand::Create(create_cmd(order_id, items)),
        )
        .unwrap();
        order
    }

    fn receive(order: &mut PurchaseOrder, item_id: PurchaseOrderItemId, quantity: i64) -> Result<(), DomainError> {
        let cmd = ReceiveItems {
            order_id: order.id_typed(),
            lines: vec![ReceiptLine { item_id, quantity }],
            received_by: UserId::new(),
            occurred_at: test_time(),
        };
        execute(order, PurchaseOrderCommand::ReceiveItems(cmd))
    }

    #[test]
    fn create_emits_created_event_with_open_status() {
        let order_id = PurchaseOrderId::new();
        let order = PurchaseOrder::empty(order_id);
        let cmd = create_cmd(order_id, vec![new_item(10, 500)]);

        let events = order
            .handle(&PurchaseOrderCommand::Create(cmd.clone()))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "purchasing.order.created");

        let order = PurchaseOrder::rehydrate(order_id, &events);
        assert_eq!(order.status(), PurchaseOrderStatus::Open);
        assert_eq!(order.po_number().as_str(), "PO-000001");
        assert_eq!(order.total_cost_cents(), 5000);
        assert_eq!(order.version(), 1);
    }

    #[test]
    fn create_validates_items_and_supplier() {
        let order_id = PurchaseOrderId::new();
        let order = PurchaseOrder::empty(order_id);

        let empty = create_cmd(order_id, vec![]);
        assert!(matches!(
            order.handle(&PurchaseOrderCommand::Create(empty)),
            Err(DomainError::Validation(_))
        ));

        let zero_qty = create_cmd(order_id, vec![new_item(0, 100)]);
        assert!(order.handle(&PurchaseOrderCommand::Create(zero_qty)).is_err());

        let negative_cost = create_cmd(order_id, vec![new_item(1, -1)]);
        assert!(order.handle(&PurchaseOrderCommand::Create(negative_cost)).is_err());

        let mut blank_supplier = create_cmd(order_id, vec![new_item(1, 1)]);
        blank_supplier.supplier_name = "  ".to_string();
        assert!(order.handle(&PurchaseOrderCommand::Create(blank_supplier)).is_err());

        let a = new_item(1, 1);
        let mut b = new_item(2, 2);
        b.variant_id = a.variant_id;
        let duplicate = create_cmd(order_id, vec![a, b]);
        assert!(order.handle(&PurchaseOrderCommand::Create(duplicate)).is_err());

        let overflow = create_cmd(order_id, vec![new_item(i64::MAX, 2)]);
        assert!(matches!(
            order.handle(&PurchaseOrderCommand::Create(overflow)),
            Err(DomainError::Validation(msg)) if msg.contains("overflow")
        ));
    }

    #[test]
    fn partial_then_full_receipt_closes_order() {
        let item = new_item(10, 500);
        let item_id = item.item_id;
        let mut order = created(vec![item]);

        receive(&mut order, item_id, 4).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(order.item(item_id).unwrap().outstanding(), 6);
        assert_eq!(order.total_cost_cents(), 5000);

        receive(&mut order, item_id, 6).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::Closed);

        let err = receive(&mut order, item_id, 1).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn over_receipt_names_the_item_and_quantities() {
        let item = new_item(10, 500);
        let item_id = item.item_id;
        let mut order = created(vec![item]);
        receive(&mut order, item_id, 6).unwrap();

        let err = receive(&mut order, item_id, 6).unwrap_err();
        assert_eq!(
            err,
            DomainError::OverReceipt {
                item_id,
                ordered: 10,
                received: 6,
                requested: 6,
            }
        );
        assert_eq!(order.item(item_id).unwrap().quantity_received, 6);
    }

    #[test]
    fn repeated_lines_for_one_item_are_summed() {
        let item = new_item(5, 100);
        let item_id = item.item_id;
        let order = created(vec![item]);

        let cmd = ReceiveItems {
            order_id: order.id_typed(),
            lines: vec![
                ReceiptLine { item_id, quantity: 3 },
                ReceiptLine { item_id, quantity: 3 },
            ],
            received_by: UserId::new(),
            occurred_at: test_time(),
        };
        let err = order
            .handle(&PurchaseOrderCommand::ReceiveItems(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::OverReceipt { requested: 6, .. }));
    }

    #[test]
    fn unknown_item_is_not_found() {
        let mut order = created(vec![new_item(5, 100)]);
        let err = receive(&mut order, PurchaseOrderItemId::new(), 1).unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "purchase_order_item", .. }));
    }

    #[test]
    fn cancel_blocks_receiving_and_editing() {
        let item = new_item(10, 500);
        let item_id = item.item_id;
        let mut order = created(vec![item]);
        receive(&mut order, item_id, 2).unwrap();

        let cancel = CancelPurchaseOrder {
            order_id: order.id_typed(),
            cancelled_by: UserId::new(),
            reason: Some("supplier out of business".to_string()),
            occurred_at: test_time(),
        };
        execute(&mut order, PurchaseOrderCommand::Cancel(cancel.clone())).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::Cancelled);
        assert_eq!(order.item(item_id).unwrap().quantity_received, 2);

        assert!(matches!(
            receive(&mut order, item_id, 1),
            Err(DomainError::InvariantViolation(_))
        ));
        assert!(matches!(
            execute(&mut order, PurchaseOrderCommand::Cancel(cancel)),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn items_are_editable_only_while_open() {
        let first = new_item(10, 500);
        let first_id = first.item_id;
        let mut order = created(vec![first]);
        let order_id = order.id_typed();

        let extra = new_item(3, 250);
        let extra_id = extra.item_id;
        execute(
            &mut order,
            PurchaseOrderCommand::AddItem(AddItem {
                order_id,
                item: extra,
                updated_by: UserId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(order.total_cost_cents(), 5750);

        execute(
            &mut order,
            PurchaseOrderCommand::UpdateItem(UpdateItem {
                order_id,
                item_id: extra_id,
                quantity_ordered: Some(4),
                unit_cost_cents: None,
                updated_by: UserId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(order.total_cost_cents(), 6000);

        execute(
            &mut order,
            PurchaseOrderCommand::RemoveItem(RemoveItem {
                order_id,
                item_id: extra_id,
                updated_by: UserId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(order.items().len(), 1);

        let remove_last = RemoveItem {
            order_id: order.id_typed(),
            item_id: first_id,
            updated_by: UserId::new(),
            occurred_at: test_time(),
        };
        assert!(execute(&mut order, PurchaseOrderCommand::RemoveItem(remove_last)).is_err());

        receive(&mut order, first_id, 1).unwrap();
        let late_add = AddItem {
            order_id: order.id_typed(),
            item: new_item(1, 1),
            updated_by: UserId::new(),
            occurred_at: test_time(),
        };
        assert!(matches!(
            execute(&mut order, PurchaseOrderCommand::AddItem(late_add)),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn status_derivation_covers_all_states() {
        let mut a = new_item(2, 1).into_item();
        let mut b = new_item(3, 1).into_item();
        assert_eq!(derive_status(&[a.clone(), b.clone()], false), PurchaseOrderStatus::Open);

        a.quantity_received = 2;
        assert_eq!(
            derive_status(&[a.clone(), b.clone()], false),
            PurchaseOrderStatus::PartiallyReceived
        );

        b.quantity_received = 3;
        assert_eq!(derive_status(&[a.clone(), b.clone()], false), PurchaseOrderStatus::Closed);
        assert_eq!(derive_status(&[a, b], true), PurchaseOrderStatus::Cancelled);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(
            "partially received".parse::<PurchaseOrderStatus>().unwrap(),
            PurchaseOrderStatus::PartiallyReceived
        );
        assert!("shipped".parse::<PurchaseOrderStatus>().is_err());
    }

    fn nil_user() -> UserId {
        "00000000-0000-0000-0000-000000000000".parse().unwrap()
    }

    #[test]
    fn huge_receipt_is_an_over_receipt_not_an_overflow() {
        let item = new_item(10, 500);
        let item_id = item.item_id;
        let mut order = created(vec![item]);
        receive(&mut order, item_id, 1).unwrap();

        let before = order.clone();
        let err = receive(&mut order, item_id, i64::MAX).unwrap_err();
        assert_eq!(
            err,
            DomainError::OverReceipt {
                item_id,
                ordered: 10,
                received: 1,
                requested: i64::MAX,
            }
        );
        assert_eq!(order, before);
    }

    #[test]
    fn repeated_huge_lines_saturate_into_an_over_receipt() {
        let item = new_item(10, 500);
        let item_id = item.item_id;
        let order = created(vec![item]);

        let cmd = ReceiveItems {
            order_id: order.id_typed(),
            lines: vec![
                ReceiptLine { item_id, quantity: i64::MAX },
                ReceiptLine { item_id, quantity: i64::MAX },
            ],
            received_by: UserId::new(),
            occurred_at: test_time(),
        };
        let err = order
            .handle(&PurchaseOrderCommand::ReceiveItems(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::OverReceipt { requested: i64::MAX, .. }));
    }

    #[test]
    fn quantity_totals_must_fit_in_i64() {
        let order_id = PurchaseOrderId::new();
        let order = PurchaseOrder::empty(order_id);
        let free_lines = create_cmd(order_id, vec![new_item(i64::MAX, 0), new_item(i64::MAX, 0)]);
        assert!(matches!(
            order.handle(&PurchaseOrderCommand::Create(free_lines)),
            Err(DomainError::Validation(msg)) if msg.contains("quantity total")
        ));

        let first = new_item(i64::MAX - 1, 0);
        let first_id = first.item_id;
        let second = new_item(1, 0);
        let second_id = second.item_id;
        let mut order = created(vec![first, second]);
        assert_eq!(order.total_ordered(), i64::MAX);
        let order_id = order.id_typed();

        let add = AddItem {
            order_id,
            item: new_item(1, 0),
            updated_by: UserId::new(),
            occurred_at: test_time(),
        };
        assert!(matches!(
            execute(&mut order, PurchaseOrderCommand::AddItem(add)),
            Err(DomainError::Validation(_))
        ));

        let grow = UpdateItem {
            order_id,
            item_id: second_id,
            quantity_ordered: Some(2),
            unit_cost_cents: None,
            updated_by: UserId::new(),
            occurred_at: test_time(),
        };
        assert!(matches!(
            execute(&mut order, PurchaseOrderCommand::UpdateItem(grow)),
            Err(DomainError::Validation(_))
        ));
        assert_eq!(order.item(first_id).unwrap().quantity_ordered, i64::MAX - 1);
        assert_eq!(order.total_ordered(), i64::MAX);
        assert_eq!(order.total_received(), 0);
    }

    #[test]
    fn totals_saturate_for_rehydrated_streams() {
        let order_id = PurchaseOrderId::new();
        let mut items = vec![new_item(1, 0).into_item(), new_item(1, 0).into_item()];
        items[0].quantity_ordered = i64::MAX;
        items[1].quantity_ordered = i64::MAX;
        let event = PurchaseOrderEvent::Created(PurchaseOrderCreated {
            order_id,
            po_number: PoNumber::format("PO-", 7),
            store_id: StoreId::new(),
            supplier_name: "Acme Supplies".to_string(),
            items,
            created_by: UserId::new(),
            occurred_at: test_time(),
        });
        let order = PurchaseOrder::rehydrate(order_id, [&event]);
        assert_eq!(order.total_ordered(), i64::MAX);
    }

    #[test]
    fn cancel_requires_an_actor() {
        let mut order = created(vec![new_item(3, 100)]);
        let cancel = CancelPurchaseOrder {
            order_id: order.id_typed(),
            cancelled_by: nil_user(),
            reason: None,
            occurred_at: test_time(),
        };
        assert!(matches!(
            execute(&mut order, PurchaseOrderCommand::Cancel(cancel)),
            Err(DomainError::Validation(msg)) if msg.contains("cancelled_by")
        ));
        assert_eq!(order.status(), PurchaseOrderStatus::Open);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of receipt attempts, every item stays within
        /// `0 ≤ received ≤ ordered`, and rejected attempts leave the order unchanged.
        #[test]
        fn receipt_bound_holds_for_any_sequence(
            ordered in prop::collection::vec(1i64..20, 1..4),
            attempts in prop::collection::vec(
                (0usize..4, prop_oneof![4 => 1i64..12, 1 => (i64::MAX - 16)..=i64::MAX]),
                0..20,
            ),
        ) {
            let items: Vec<_> = ordered.iter().map(|q| new_item(*q, 100)).collect();
            let ids: Vec<_> = items.iter().map(|i| i.item_id).collect();
            let mut order = created(items);

            for (idx, quantity) in attempts {
                let item_id = ids[idx % ids.len()];
                let before = order.clone();
                if receive(&mut order, item_id, quantity).is_err() {
                    prop_assert_eq!(&order, &before);
                }
                for item in order.items() {
                    prop_assert!(item.quantity_received >= 0);
                    prop_assert!(item.quantity_received <= item.quantity_ordered);
                }
            }
        }
    }
}
