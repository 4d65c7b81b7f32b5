//! Inbound application contract (transport-agnostic).
//!
//! This folder is structured like:
//! - `services.rs`: infrastructure wiring (ledger writer, services, read façade, worker)
//! - `queries.rs`: read-only façade over levels, movements and purchase orders
//! - `dto.rs`: request DTOs and serializable views
//! - `errors.rs`: error codes and JSON error bodies
//!
//! Requests carry ids as strings; malformed ids fail with `invalid_id` before any state is
//! touched.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use stockledger_core::{
    MovementId, ProductVariantId, PurchaseOrderId, PurchaseOrderItemId, StoreId, UserId,
};
use stockledger_infra::{
    Clock, InventorySnapshot, LedgerConfig, LevelScope, MovementFilter, OrderLine, Pagination,
    PurchaseOrderFilter, SystemClock, WorkerHandle,
};
use stockledger_inventory::{AdjustStock, MovementReason, RecordStockCount, ReverseMovement};
use stockledger_purchasing::{PurchaseOrderStatus, ReceiptLine};

pub mod dto;
pub mod errors;
pub mod queries;
pub mod services;

use dto::{parse_id, parse_opt_id};
use errors::ApiError;
use queries::InventoryQueryApi;
use services::AppServices;

/// Every inbound inventory operation, over shared in-memory state.
///
/// Cheap to clone; clones share the same ledger.
#[derive(Debug, Clone)]
pub struct InventoryApp {
    services: Arc<AppServices>,
}

impl InventoryApp {
    /// Fails only when a configured journal cannot be opened or replayed.
    pub fn new(config: LedgerConfig) -> Result<Self, ApiError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: LedgerConfig, clock: Arc<dyn Clock>) -> Result<Self, ApiError> {
        Ok(Self {
            services: Arc::new(AppServices::build(config, clock)?),
        })
    }

    /// Configuration from `STOCKLEDGER_*` environment variables.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::new(LedgerConfig::from_env()?)
    }

    pub fn services(&self) -> &AppServices {
        &self.services
    }

    pub fn queries(&self) -> &InventoryQueryApi {
        &self.services.queries
    }

    pub fn spawn_reconciliation(&self) -> Result<Option<WorkerHandle>, ApiError> {
        Ok(self.services.spawn_reconciliation()?)
    }

    // -------------------------
    // Purchase orders
    // -------------------------

    pub fn create_purchase_order(
        &self,
        req: dto::CreatePurchaseOrderRequest,
    ) -> Result<dto::PurchaseOrderView, ApiError> {
        let store_id: StoreId = parse_id("store_id", &req.store_id)?;
        let created_by: UserId = parse_id("created_by", &req.created_by)?;
        let lines = req
            .items
            .iter()
            .map(order_line)
            .collect::<Result<Vec<_>, _>>()?;

        let order = self.services.purchase_orders.create_purchase_order(
            store_id,
            &req.supplier_name,
            lines,
            created_by,
        )?;
        Ok(dto::PurchaseOrderView::from(&order))
    }

    pub fn add_purchase_order_item(
        &self,
        po_id: &str,
        req: dto::AddPurchaseOrderItemRequest,
    ) -> Result<dto::PurchaseOrderView, ApiError> {
        let order_id: PurchaseOrderId = parse_id("purchase_order_id", po_id)?;
        let updated_by: UserId = parse_id("updated_by", &req.updated_by)?;
        let line = order_line(&req.item)?;

        let order = self
            .services
            .purchase_orders
            .add_item(order_id, line, updated_by)?;
        Ok(dto::PurchaseOrderView::from(&order))
    }

    pub fn update_purchase_order_item(
        &self,
        po_id: &str,
        item_id: &str,
        req: dto::UpdatePurchaseOrderItemRequest,
    ) -> Result<dto::PurchaseOrderView, ApiError> {
        let order_id: PurchaseOrderId = parse_id("purchase_order_id", po_id)?;
        let item_id: PurchaseOrderItemId = parse_id("item_id", item_id)?;
        let updated_by: UserId = parse_id("updated_by", &req.updated_by)?;

        let order = self.services.purchase_orders.update_item(
            order_id,
            item_id,
            req.quantity_ordered,
            req.unit_cost_cents,
            updated_by,
        )?;
        Ok(dto::PurchaseOrderView::from(&order))
    }

    pub fn remove_purchase_order_item(
        &self,
        po_id: &str,
        item_id: &str,
        updated_by: &str,
    ) -> Result<dto::PurchaseOrderView, ApiError> {
        let order_id: PurchaseOrderId = parse_id("purchase_order_id", po_id)?;
        let item_id: PurchaseOrderItemId = parse_id("item_id", item_id)?;
        let updated_by: UserId = parse_id("updated_by", updated_by)?;

        let order = self
            .services
            .purchase_orders
            .remove_item(order_id, item_id, updated_by)?;
        Ok(dto::PurchaseOrderView::from(&order))
    }

    pub fn receive_items(
        &self,
        po_id: &str,
        req: dto::ReceiveItemsRequest,
    ) -> Result<dto::ReceiptView, ApiError> {
        let order_id: PurchaseOrderId = parse_id("purchase_order_id", po_id)?;
        let received_by: UserId = parse_id("received_by", &req.received_by)?;
        let lines = req
            .lines
            .iter()
            .map(|l| {
                Ok(ReceiptLine {
                    item_id: parse_id("item_id", &l.item_id)?,
                    quantity: l.quantity,
                })
            })
            .collect::<Result<Vec<_>, ApiError>>()?;

        let outcome = self
            .services
            .purchase_orders
            .receive_items(order_id, lines, received_by)?;
        Ok(dto::ReceiptView {
            order: dto::PurchaseOrderView::from(&outcome.order),
            movements: outcome.movements.iter().map(dto::MovementView::from).collect(),
        })
    }

    pub fn cancel_purchase_order(
        &self,
        po_id: &str,
        req: dto::CancelPurchaseOrderRequest,
    ) -> Result<dto::PurchaseOrderView, ApiError> {
        let order_id: PurchaseOrderId = parse_id("purchase_order_id", po_id)?;
        let cancelled_by: UserId = parse_id("cancelled_by", &req.cancelled_by)?;

        let order = self.services.purchase_orders.cancel_purchase_order(
            order_id,
            cancelled_by,
            req.reason,
        )?;
        Ok(dto::PurchaseOrderView::from(&order))
    }

    // -------------------------
    // Stock adjustments
    // -------------------------

    pub fn adjust_stock(&self, req: dto::AdjustStockRequest) -> Result<dto::MovementView, ApiError> {
        let cmd = AdjustStock {
            store_id: parse_id("store_id", &req.store_id)?,
            variant_id: parse_id("product_variant_id", &req.product_variant_id)?,
            change_quantity: req.change_quantity,
            reason: MovementReason::parse(&req.reason)?,
            note: req.note,
            created_by: parse_id("created_by", &req.created_by)?,
        };
        let movement = self.services.adjustments.adjust_stock(cmd)?;
        Ok(dto::MovementView::from(&movement))
    }

    /// `None` when the count matches the current level.
    pub fn record_stock_count(
        &self,
        req: dto::StockCountRequest,
    ) -> Result<Option<dto::MovementView>, ApiError> {
        let cmd = RecordStockCount {
            store_id: parse_id("store_id", &req.store_id)?,
            variant_id: parse_id("product_variant_id", &req.product_variant_id)?,
            counted_quantity: req.counted_quantity,
            note: req.note,
            created_by: parse_id("created_by", &req.created_by)?,
        };
        let movement = self.services.adjustments.record_stock_count(cmd)?;
        Ok(movement.as_ref().map(dto::MovementView::from))
    }

    pub fn reverse_movement(
        &self,
        movement_id: &str,
        req: dto::ReverseMovementRequest,
    ) -> Result<dto::MovementView, ApiError> {
        let cmd = ReverseMovement {
            movement_id: parse_id::<MovementId>("movement_id", movement_id)?,
            note: req.note,
            created_by: parse_id("created_by", &req.created_by)?,
        };
        let movement = self.services.adjustments.reverse_movement(cmd)?;
        Ok(dto::MovementView::from(&movement))
    }

    // -------------------------
    // Queries
    // -------------------------

    pub fn get_level(
        &self,
        store_id: &str,
        product_variant_id: &str,
    ) -> Result<dto::StockLevelView, ApiError> {
        self.queries().get_level(
            parse_id("store_id", store_id)?,
            parse_id("product_variant_id", product_variant_id)?,
        )
    }

    pub fn list_by_store(&self, store_id: &str) -> Result<Vec<dto::StockLevelView>, ApiError> {
        self.queries().list_by_store(parse_id("store_id", store_id)?)
    }

    pub fn stock_by_store(&self) -> Result<Vec<dto::StoreStockView>, ApiError> {
        self.queries().stock_by_store()
    }

    pub fn query_movements(
        &self,
        req: &dto::MovementQueryRequest,
    ) -> Result<dto::MovementPageView, ApiError> {
        let filter = movement_filter(req)?;
        self.queries()
            .query_movements(&filter, Pagination::new(req.limit, req.offset))
    }

    /// Lazily walks every matching movement; `limit`/`offset` are ignored, `page_size`
    /// controls the fetch granularity.
    pub fn movement_history(
        &self,
        req: &dto::MovementQueryRequest,
        page_size: u32,
    ) -> Result<impl Iterator<Item = Result<dto::MovementView, ApiError>> + '_, ApiError> {
        let filter = movement_filter(req)?;
        Ok(self.queries().movement_history(filter, page_size))
    }

    pub fn get_purchase_order(&self, po_id: &str) -> Result<dto::PurchaseOrderView, ApiError> {
        self.queries()
            .get_purchase_order(parse_id("purchase_order_id", po_id)?)
    }

    pub fn get_purchase_order_by_number(
        &self,
        po_number: &str,
    ) -> Result<dto::PurchaseOrderView, ApiError> {
        self.queries().get_purchase_order_by_number(po_number)
    }

    pub fn list_purchase_orders(
        &self,
        req: &dto::PurchaseOrderListRequest,
    ) -> Result<dto::PurchaseOrderPageView, ApiError> {
        let filter = PurchaseOrderFilter {
            store_id: parse_opt_id("store_id", req.store_id.as_deref())?,
            status: req
                .status
                .as_deref()
                .map(str::parse::<PurchaseOrderStatus>)
                .transpose()?,
            supplier: req
                .supplier
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        };
        self.queries()
            .list_purchase_orders(&filter, Pagination::new(req.limit, req.offset))
    }

    pub fn purchase_order_history(
        &self,
        po_id: &str,
    ) -> Result<Vec<dto::PurchaseOrderEventView>, ApiError> {
        self.queries()
            .purchase_order_history(parse_id("purchase_order_id", po_id)?)
    }

    pub fn purchase_order_movements(
        &self,
        po_id: &str,
    ) -> Result<Vec<dto::MovementView>, ApiError> {
        self.queries()
            .purchase_order_movements(parse_id("purchase_order_id", po_id)?)
    }

    // -------------------------
    // Maintenance
    // -------------------------

    /// Recompute levels from the ledger (whole ledger when both ids are `None`).
    pub fn rebuild_levels(
        &self,
        store_id: Option<&str>,
        product_variant_id: Option<&str>,
    ) -> Result<dto::RebuildReportView, ApiError> {
        let scope = level_scope(store_id, product_variant_id)?;
        let report = self.services.writer.rebuild(scope)?;
        Ok(dto::RebuildReportView::from(&report))
    }

    /// Fails with `consistency_error` on the first level that disagrees with the ledger.
    pub fn verify_levels(
        &self,
        store_id: Option<&str>,
        product_variant_id: Option<&str>,
    ) -> Result<(), ApiError> {
        let scope = level_scope(store_id, product_variant_id)?;
        Ok(self.services.writer.verify(scope)?)
    }

    pub fn snapshot(&self) -> Result<InventorySnapshot, ApiError> {
        Ok(InventorySnapshot::capture(
            self.services.writer.as_ref(),
            self.services.clock.as_ref(),
        )?)
    }

    /// Rewrite the commit journal as a single baseline. No-op when journaling is off.
    pub fn compact_journal(&self) -> Result<(), ApiError> {
        self.services.writer.compact_journal()?;
        Ok(())
    }

    pub fn export_snapshot(&self, path: &Path) -> Result<InventorySnapshot, ApiError> {
        let snapshot = self.snapshot()?;
        snapshot.save(path)?;
        Ok(snapshot)
    }

    /// Load state from a snapshot file. Levels are restored as stored; call
    /// [`verify_levels`](Self::verify_levels) to check them against the ledger.
    pub fn import_snapshot(
        path: &Path,
        config: LedgerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ApiError> {
        let snapshot = InventorySnapshot::load(path)?;
        let movements = snapshot.movements.len();
        let services = AppServices::from_snapshot(snapshot, config, clock)?;
        info!(path = %path.display(), movements, "inventory state imported");
        Ok(Self {
            services: Arc::new(services),
        })
    }
}

fn order_line(item: &dto::PurchaseOrderItemRequest) -> Result<OrderLine, ApiError> {
    Ok(OrderLine::new(
        parse_id::<ProductVariantId>("product_variant_id", &item.product_variant_id)?,
        item.quantity_ordered,
        item.unit_cost_cents,
    ))
}

fn movement_filter(req: &dto::MovementQueryRequest) -> Result<MovementFilter, ApiError> {
    Ok(MovementFilter {
        store_id: parse_opt_id("store_id", req.store_id.as_deref())?,
        variant_id: parse_opt_id("product_variant_id", req.product_variant_id.as_deref())?,
        from: req.from,
        to: req.to,
        reason: req.reason.as_deref().map(MovementReason::parse).transpose()?,
        purchase_order_id: parse_opt_id("purchase_order_id", req.purchase_order_id.as_deref())?,
        reverses: None,
    })
}

fn level_scope(
    store_id: Option<&str>,
    product_variant_id: Option<&str>,
) -> Result<LevelScope, ApiError> {
    Ok(LevelScope {
        store_id: parse_opt_id("store_id", store_id)?,
        variant_id: parse_opt_id("product_variant_id", product_variant_id)?,
    })
}
