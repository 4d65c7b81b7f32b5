use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    DomainError, DomainResult, MovementId, ProductVariantId, PurchaseOrderId,
    PurchaseOrderItemId, StoreId, UserId,
};

use crate::level::StockKey;

/// Why a movement happened.
///
/// The canonical causes are typed; anything else is kept as free text. Canonical names
/// are matched case-insensitively (spaces and dashes count as underscores), so a free-text
/// reason can never shadow a canonical one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum MovementReason {
    PurchaseReceipt,
    ManualAdjustment,
    InitialStock,
    Sale,
    Return,
    Correction,
    Other(String),
}

impl MovementReason {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("movement reason cannot be blank"));
        }

        let normalized = trimmed.to_ascii_uppercase().replace([' ', '-'], "_");
        Ok(match normalized.as_str() {
            "PURCHASE_RECEIPT" => Self::PurchaseReceipt,
            "MANUAL_ADJUSTMENT" => Self::ManualAdjustment,
            "INITIAL_STOCK" => Self::InitialStock,
            "SALE" => Self::Sale,
            "RETURN" => Self::Return,
            "CORRECTION" => Self::Correction,
            _ => Self::Other(trimmed.to_string()),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::PurchaseReceipt => "PURCHASE_RECEIPT",
            Self::ManualAdjustment => "MANUAL_ADJUSTMENT",
            Self::InitialStock => "INITIAL_STOCK",
            Self::Sale => "SALE",
            Self::Return => "RETURN",
            Self::Correction => "CORRECTION",
            Self::Other(text) => text,
        }
    }

    pub fn is_canonical(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl core::fmt::Display for MovementReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementReason {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<MovementReason> for String {
    fn from(value: MovementReason) -> Self {
        match value {
            MovementReason::Other(text) => text,
            canonical => canonical.as_str().to_string(),
        }
    }
}

impl TryFrom<String> for MovementReason {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

/// A movement requested by a writer, not yet assigned an id, sequence or timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub store_id: StoreId,
    pub variant_id: ProductVariantId,
    /// Signed change; positive = inbound, negative = outbound. Never zero.
    pub change_quantity: i64,
    pub reason: MovementReason,
    pub purchase_order_id: Option<PurchaseOrderId>,
    pub purchase_order_item_id: Option<PurchaseOrderItemId>,
    pub reverses: Option<MovementId>,
    pub note: Option<String>,
    pub created_by: UserId,
}

impl NewMovement {
    pub fn new(
        store_id: StoreId,
        variant_id: ProductVariantId,
        change_quantity: i64,
        reason: MovementReason,
        created_by: UserId,
    ) -> Self {
        Self {
            store_id,
            variant_id,
            change_quantity,
            reason,
            purchase_order_id: None,
            purchase_order_item_id: None,
            reverses: None,
            note: None,
            created_by,
        }
    }

    /// Inbound movement for goods received against a purchase order line.
    pub fn purchase_receipt(
        store_id: StoreId,
        variant_id: ProductVariantId,
        quantity: i64,
        order_id: PurchaseOrderId,
        item_id: PurchaseOrderItemId,
        created_by: UserId,
    ) -> Self {
        Self {
            purchase_order_id: Some(order_id),
            purchase_order_item_id: Some(item_id),
            ..Self::new(
                store_id,
                variant_id,
                quantity,
                MovementReason::PurchaseReceipt,
                created_by,
            )
        }
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.store_id, self.variant_id)
    }

    /// Checks everything the ledger requires before an entry may be appended.
    pub fn validate(&self) -> DomainResult<()> {
        if self.change_quantity == 0 {
            return Err(DomainError::validation("change_quantity cannot be zero"));
        }
        if self.store_id.is_nil() {
            return Err(DomainError::validation("store_id is required"));
        }
        if self.variant_id.is_nil() {
            return Err(DomainError::validation("product_variant_id is required"));
        }
        if self.created_by.is_nil() {
            return Err(DomainError::validation("created_by is required"));
        }
        if let MovementReason::Other(text) = &self.reason {
            if text.trim().is_empty() {
                return Err(DomainError::validation("movement reason cannot be blank"));
            }
        }

        let is_receipt = self.reason == MovementReason::PurchaseReceipt;
        if is_receipt != self.purchase_order_item_id.is_some() {
            return Err(DomainError::validation(
                "purchase receipts must reference a purchase order item, and only receipts may",
            ));
        }
        if is_receipt && self.change_quantity < 0 {
            return Err(DomainError::validation(
                "purchase receipts must be inbound movements",
            ));
        }

        Ok(())
    }
}

/// Immutable ledger entry.
///
/// Only the ledger store constructs these (via [`StockMovement::record`]); there are no
/// setters. Corrections are new movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    id: MovementId,
    /// 1-based, gap-free position in the ledger.
    sequence: u64,
    store_id: StoreId,
    variant_id: ProductVariantId,
    change_quantity: i64,
    reason: MovementReason,
    purchase_order_id: Option<PurchaseOrderId>,
    purchase_order_item_id: Option<PurchaseOrderItemId>,
    reverses: Option<MovementId>,
    note: Option<String>,
    created_at: DateTime<Utc>,
    created_by: UserId,
}

impl StockMovement {
    /// Seal a validated movement with the identity the ledger assigned to it.
    pub fn record(
        new: NewMovement,
        id: MovementId,
        sequence: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sequence,
            store_id: new.store_id,
            variant_id: new.variant_id,
            change_quantity: new.change_quantity,
            reason: new.reason,
            purchase_order_id: new.purchase_order_id,
            purchase_order_item_id: new.purchase_order_item_id,
            reverses: new.reverses,
            note: new.note,
            created_at,
            created_by: new.created_by,
        }
    }

    pub fn id(&self) -> MovementId {
        self.id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    pub fn variant_id(&self) -> ProductVariantId {
        self.variant_id
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.store_id, self.variant_id)
    }

    pub fn change_quantity(&self) -> i64 {
        self.change_quantity
    }

    pub fn reason(&self) -> &MovementReason {
        &self.reason
    }

    pub fn purchase_order_id(&self) -> Option<PurchaseOrderId> {
        self.purchase_order_id
    }

    pub fn purchase_order_item_id(&self) -> Option<PurchaseOrderItemId> {
        self.purchase_order_item_id
    }

    pub fn reverses(&self) -> Option<MovementId> {
        self.reverses
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }
}
