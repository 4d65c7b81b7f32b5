//! Read-only façade over levels, movements and purchase orders.
//!
//! No business rules here: lookups, aggregation and mapping to views only. Reads never
//! take the commit lock.

use std::sync::Arc;

use stockledger_core::{DomainError, ProductVariantId, PurchaseOrderId, StoreId};
use stockledger_infra::{
    InMemoryLedgerStore, InMemoryPurchaseOrderRepository, LedgerStore, LedgerWriter,
    MovementFilter, Pagination, PurchaseOrderFilter, PurchaseOrderRepository,
};
use stockledger_inventory::StockKey;

use crate::app::dto::{
    MovementPageView, MovementView, PurchaseOrderEventView, PurchaseOrderPageView,
    PurchaseOrderView, StockLevelView, StoreStockView,
};
use crate::app::errors::ApiError;

/// Page size used when walking every movement of a purchase order.
const PO_MOVEMENT_PAGE_SIZE: u32 = 200;

#[derive(Debug)]
pub struct InventoryQueryApi<L = InMemoryLedgerStore, R = InMemoryPurchaseOrderRepository> {
    writer: Arc<LedgerWriter<L, R>>,
}

impl<L, R> Clone for InventoryQueryApi<L, R> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
        }
    }
}

impl<L, R> InventoryQueryApi<L, R>
where
    L: LedgerStore,
    R: PurchaseOrderRepository,
{
    pub fn new(writer: Arc<LedgerWriter<L, R>>) -> Self {
        Self { writer }
    }

    /// Current level; a never-stocked key reads as quantity 0 at version 0.
    pub fn get_level(
        &self,
        store_id: StoreId,
        variant_id: ProductVariantId,
    ) -> Result<StockLevelView, ApiError> {
        let level = self
            .writer
            .levels()
            .level_or_empty(StockKey::new(store_id, variant_id))?;
        Ok(StockLevelView::from(&level))
    }

    /// Levels of one store, sorted by variant id.
    pub fn list_by_store(&self, store_id: StoreId) -> Result<Vec<StockLevelView>, ApiError> {
        Ok(self
            .writer
            .levels()
            .list_by_store(store_id)?
            .iter()
            .map(StockLevelView::from)
            .collect())
    }

    /// Levels grouped per store, stores in id order.
    pub fn stock_by_store(&self) -> Result<Vec<StoreStockView>, ApiError> {
        let mut grouped: Vec<StoreStockView> = Vec::new();
        for level in self.writer.levels().all()? {
            let view = StockLevelView::from(&level);
            match grouped.last_mut() {
                Some(store) if store.store_id == view.store_id => {
                    store.total_units = store.total_units.saturating_add(view.quantity);
                    store.levels.push(view);
                }
                _ => grouped.push(StoreStockView {
                    store_id: view.store_id.clone(),
                    total_units: view.quantity,
                    levels: vec![view],
                }),
            }
        }
        Ok(grouped)
    }

    pub fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPageView, ApiError> {
        let result = self.writer.ledger().query(filter, pagination.normalized())?;
        Ok(MovementPageView::from(result))
    }

    /// Every matching movement, fetched lazily one page at a time.
    pub fn movement_history(
        &self,
        filter: MovementFilter,
        page_size: u32,
    ) -> impl Iterator<Item = Result<MovementView, ApiError>> + '_ {
        LedgerStore::stream(self.writer.ledger().as_ref(), filter, page_size)
            .map(|res| res.map(|m| MovementView::from(&m)).map_err(ApiError::from))
    }

    pub fn get_purchase_order(&self, id: PurchaseOrderId) -> Result<PurchaseOrderView, ApiError> {
        let order = self
            .writer
            .orders()
            .load(id)?
            .ok_or_else(|| DomainError::not_found("purchase_order", id))?;
        Ok(PurchaseOrderView::from(&order))
    }

    pub fn get_purchase_order_by_number(
        &self,
        po_number: &str,
    ) -> Result<PurchaseOrderView, ApiError> {
        let order = self
            .writer
            .orders()
            .get_by_number(po_number.trim())?
            .ok_or_else(|| DomainError::not_found("purchase_order", po_number.trim()))?;
        Ok(PurchaseOrderView::from(&order))
    }

    pub fn list_purchase_orders(
        &self,
        filter: &PurchaseOrderFilter,
        pagination: Pagination,
    ) -> Result<PurchaseOrderPageView, ApiError> {
        let page = self.writer.orders().list(filter, pagination.normalized())?;
        Ok(PurchaseOrderPageView::from(page))
    }

    pub fn purchase_order_history(
        &self,
        id: PurchaseOrderId,
    ) -> Result<Vec<PurchaseOrderEventView>, ApiError> {
        let history = self.writer.orders().history(id)?;
        if history.is_empty() {
            return Err(DomainError::not_found("purchase_order", id).into());
        }
        Ok(history.iter().map(PurchaseOrderEventView::from).collect())
    }

    /// Receipt movements linked to the order, in ledger order.
    pub fn purchase_order_movements(
        &self,
        id: PurchaseOrderId,
    ) -> Result<Vec<MovementView>, ApiError> {
        if self.writer.orders().version(id)? == 0 {
            return Err(DomainError::not_found("purchase_order", id).into());
        }
        self.movement_history(MovementFilter::for_purchase_order(id), PO_MOVEMENT_PAGE_SIZE)
            .collect()
    }
}
