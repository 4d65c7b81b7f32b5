use std::sync::Arc;

use chrono::Utc;
use stockledger_api::InventoryApp;
use stockledger_api::dto::{
    AddPurchaseOrderItemRequest, AdjustStockRequest, CancelPurchaseOrderRequest,
    CreatePurchaseOrderRequest, MovementQueryRequest, PurchaseOrderItemRequest,
    PurchaseOrderListRequest, ReceiveItemsRequest, ReceiveLineRequest, ReverseMovementRequest,
    StockCountRequest, UpdatePurchaseOrderItemRequest,
};
use stockledger_core::{ProductVariantId, StoreId, UserId};
use stockledger_infra::{LedgerConfig, ManualClock};

struct Fixture {
    app: InventoryApp,
    store: String,
    user: String,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    fn with_config(config: LedgerConfig) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        Self {
            app: InventoryApp::with_clock(config, clock).expect("wire app"),
            store: StoreId::new().to_string(),
            user: UserId::new().to_string(),
        }
    }

    fn item(variant: &str, quantity: i64, unit_cost_cents: i64) -> PurchaseOrderItemRequest {
        PurchaseOrderItemRequest {
            product_variant_id: variant.to_string(),
            quantity_ordered: quantity,
            unit_cost_cents,
        }
    }

    fn create_order(&self, items: Vec<PurchaseOrderItemRequest>) -> stockledger_api::dto::PurchaseOrderView {
        self.app
            .create_purchase_order(CreatePurchaseOrderRequest {
                store_id: self.store.clone(),
                supplier_name: "Acme Supply".to_string(),
                items,
                created_by: self.user.clone(),
            })
            .expect("create purchase order")
    }

    fn receive(&self, po_id: &str, item_id: &str, quantity: i64) -> Result<stockledger_api::dto::ReceiptView, stockledger_api::ApiError> {
        self.app.receive_items(
            po_id,
            ReceiveItemsRequest {
                lines: vec![ReceiveLineRequest {
                    item_id: item_id.to_string(),
                    quantity,
                }],
                received_by: self.user.clone(),
            },
        )
    }

    fn adjust(&self, variant: &str, change: i64, reason: &str) -> Result<stockledger_api::dto::MovementView, stockledger_api::ApiError> {
        self.app.adjust_stock(AdjustStockRequest {
            store_id: self.store.clone(),
            product_variant_id: variant.to_string(),
            change_quantity: change,
            reason: reason.to_string(),
            note: None,
            created_by: self.user.clone(),
        })
    }

    fn quantity(&self, variant: &str) -> i64 {
        self.app.get_level(&self.store, variant).unwrap().quantity
    }
}

fn variant() -> String {
    ProductVariantId::new().to_string()
}

#[test]
fn purchase_order_lifecycle_through_the_facade() {
    let fx = Fixture::new();
    let v = variant();

    let po = fx.create_order(vec![Fixture::item(&v, 10, 500)]);
    assert_eq!(po.status, "OPEN");
    assert!(po.po_number.starts_with("PO-"));
    assert_eq!(po.total_cost_cents, 5_000);
    let item_id = po.items[0].id.clone();

    let receipt = fx.receive(&po.id, &item_id, 4).unwrap();
    assert_eq!(receipt.order.status, "PARTIALLY_RECEIVED");
    assert_eq!(receipt.movements.len(), 1);
    assert_eq!(receipt.movements[0].reason, "PURCHASE_RECEIPT");
    assert_eq!(receipt.movements[0].purchase_order_id.as_deref(), Some(po.id.as_str()));
    assert_eq!(fx.quantity(&v), 4);

    let receipt = fx.receive(&po.id, &item_id, 6).unwrap();
    assert_eq!(receipt.order.status, "CLOSED");
    assert_eq!(fx.quantity(&v), 10);

    let by_number = fx.app.get_purchase_order_by_number(&po.po_number).unwrap();
    assert_eq!(by_number.id, po.id);
    assert_eq!(by_number.total_received, 10);

    let movements = fx.app.purchase_order_movements(&po.id).unwrap();
    assert_eq!(movements.iter().map(|m| m.change_quantity).collect::<Vec<_>>(), vec![4, 6]);

    let history = fx.app.purchase_order_history(&po.id).unwrap();
    let types: Vec<_> = history.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![
            "purchasing.order.created",
            "purchasing.order.items_received",
            "purchasing.order.items_received",
        ]
    );
}

#[test]
fn over_receipt_is_rejected_with_details_and_no_stock_change() {
    let fx = Fixture::new();
    let v = variant();
    let po = fx.create_order(vec![Fixture::item(&v, 5, 100)]);
    let item_id = po.items[0].id.clone();

    fx.receive(&po.id, &item_id, 3).unwrap();
    let err = fx.receive(&po.id, &item_id, 3).unwrap_err();

    assert_eq!(err.code(), "over_receipt");
    let body = err.to_json();
    assert_eq!(body["details"]["ordered"], 5);
    assert_eq!(body["details"]["received"], 3);
    assert_eq!(body["details"]["requested"], 3);
    assert_eq!(fx.quantity(&v), 3);
}

#[test]
fn items_are_editable_only_while_open() {
    let fx = Fixture::new();
    let (a, b) = (variant(), variant());
    let po = fx.create_order(vec![Fixture::item(&a, 2, 100)]);

    let po = fx
        .app
        .add_purchase_order_item(
            &po.id,
            AddPurchaseOrderItemRequest {
                item: Fixture::item(&b, 3, 250),
                updated_by: fx.user.clone(),
            },
        )
        .unwrap();
    assert_eq!(po.items.len(), 2);
    assert_eq!(po.total_cost_cents, 2 * 100 + 3 * 250);

    let first = po.items[0].id.clone();
    let po = fx
        .app
        .update_purchase_order_item(
            &po.id,
            &first,
            UpdatePurchaseOrderItemRequest {
                quantity_ordered: Some(4),
                unit_cost_cents: None,
                updated_by: fx.user.clone(),
            },
        )
        .unwrap();
    assert_eq!(po.total_ordered, 7);

    let second = po.items[1].id.clone();
    let po = fx
        .app
        .remove_purchase_order_item(&po.id, &second, &fx.user)
        .unwrap();
    assert_eq!(po.items.len(), 1);

    fx.receive(&po.id, &first, 1).unwrap();
    let err = fx
        .app
        .add_purchase_order_item(
            &po.id,
            AddPurchaseOrderItemRequest {
                item: Fixture::item(&b, 1, 1),
                updated_by: fx.user.clone(),
            },
        )
        .unwrap_err();
    assert_eq!(err.code(), "invariant_violation");
}

#[test]
fn cancelled_orders_reject_receipts() {
    let fx = Fixture::new();
    let v = variant();
    let po = fx.create_order(vec![Fixture::item(&v, 5, 100)]);

    let cancelled = fx
        .app
        .cancel_purchase_order(
            &po.id,
            CancelPurchaseOrderRequest {
                cancelled_by: fx.user.clone(),
                reason: Some("supplier out of stock".to_string()),
            },
        )
        .unwrap();
    assert_eq!(cancelled.status, "CANCELLED");
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("supplier out of stock"));
    assert!(cancelled.cancelled_at.is_some());

    let err = fx.receive(&po.id, &po.items[0].id, 1).unwrap_err();
    assert_eq!(err.code(), "invariant_violation");
    assert_eq!(fx.quantity(&v), 0);
}

#[test]
fn adjustments_counts_and_reversals() {
    let fx = Fixture::new();
    let v = variant();

    fx.adjust(&v, 20, "initial stock").unwrap();
    let sale = fx.adjust(&v, -5, "SALE").unwrap();
    assert_eq!(fx.quantity(&v), 15);

    let err = fx.adjust(&v, -100, "SALE").unwrap_err();
    assert_eq!(err.code(), "insufficient_stock");
    assert_eq!(err.to_json()["details"]["available"], 15);

    let err = fx.adjust(&v, 1, "purchase receipt").unwrap_err();
    assert_eq!(err.code(), "validation_error");

    let count = fx
        .app
        .record_stock_count(StockCountRequest {
            store_id: fx.store.clone(),
            product_variant_id: v.clone(),
            counted_quantity: 12,
            note: Some("cycle count".to_string()),
            created_by: fx.user.clone(),
        })
        .unwrap()
        .expect("count differs from level");
    assert_eq!(count.change_quantity, -3);
    assert_eq!(fx.quantity(&v), 12);

    let unchanged = fx
        .app
        .record_stock_count(StockCountRequest {
            store_id: fx.store.clone(),
            product_variant_id: v.clone(),
            counted_quantity: 12,
            note: None,
            created_by: fx.user.clone(),
        })
        .unwrap();
    assert!(unchanged.is_none());

    let reversal = fx
        .app
        .reverse_movement(
            &sale.id,
            ReverseMovementRequest {
                note: None,
                created_by: fx.user.clone(),
            },
        )
        .unwrap();
    assert_eq!(reversal.change_quantity, 5);
    assert_eq!(reversal.reverses.as_deref(), Some(sale.id.as_str()));
    assert_eq!(fx.quantity(&v), 17);

    let again = fx
        .app
        .reverse_movement(
            &sale.id,
            ReverseMovementRequest {
                note: None,
                created_by: fx.user.clone(),
            },
        )
        .unwrap_err();
    assert_eq!(again.code(), "invariant_violation");
}

#[test]
fn backorder_stores_may_go_negative() {
    let store = StoreId::new();
    let config = LedgerConfig {
        backorder_stores: vec![store],
        ..LedgerConfig::default()
    };
    let mut fx = Fixture::with_config(config);
    fx.store = store.to_string();
    let v = variant();

    fx.adjust(&v, -4, "SALE").unwrap();
    assert_eq!(fx.quantity(&v), -4);
}

#[test]
fn malformed_ids_fail_before_touching_state() {
    let fx = Fixture::new();

    let err = fx.adjust("not-a-uuid", 5, "SALE").unwrap_err();
    assert_eq!(err.code(), "invalid_id");
    assert!(err.to_string().contains("product_variant_id"));

    let err = fx.app.get_purchase_order("42").unwrap_err();
    assert_eq!(err.code(), "invalid_id");

    let page = fx.app.query_movements(&MovementQueryRequest::default()).unwrap();
    assert_eq!(page.total, 0);
}

#[test]
fn unknown_entities_are_not_found() {
    let fx = Fixture::new();
    let missing = stockledger_core::PurchaseOrderId::new().to_string();

    assert_eq!(fx.app.get_purchase_order(&missing).unwrap_err().code(), "not_found");
    assert_eq!(fx.app.purchase_order_history(&missing).unwrap_err().code(), "not_found");
    assert_eq!(fx.app.purchase_order_movements(&missing).unwrap_err().code(), "not_found");
    assert_eq!(
        fx.app.get_purchase_order_by_number("PO-999999").unwrap_err().code(),
        "not_found"
    );

    let level = fx.app.get_level(&fx.store, &variant()).unwrap();
    assert_eq!((level.quantity, level.version), (0, 0));
}

#[test]
fn queries_filter_and_paginate() {
    let fx = Fixture::new();
    let (a, b) = (variant(), variant());
    for _ in 0..3 {
        fx.adjust(&a, 2, "initial stock").unwrap();
    }
    fx.adjust(&b, 7, "initial stock").unwrap();

    let page = fx
        .app
        .query_movements(&MovementQueryRequest {
            product_variant_id: Some(a.clone()),
            limit: Some(2),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.movements.len(), 2);
    assert!(page.has_more);

    let all: Vec<_> = fx
        .app
        .movement_history(&MovementQueryRequest::default(), 1)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(all.len(), 4);
    assert!(all.windows(2).all(|w| w[0].sequence < w[1].sequence));

    let levels = fx.app.list_by_store(&fx.store).unwrap();
    assert_eq!(levels.len(), 2);
    let stores = fx.app.stock_by_store().unwrap();
    assert_eq!(stores.len(), 1);
    assert_eq!(stores[0].total_units, 13);

    fx.create_order(vec![Fixture::item(&a, 1, 1)]);
    let orders = fx
        .app
        .list_purchase_orders(&PurchaseOrderListRequest {
            status: Some("open".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(orders.total, 1);

    let err = fx
        .app
        .list_purchase_orders(&PurchaseOrderListRequest {
            status: Some("shipped".to_string()),
            ..Default::default()
        })
        .unwrap_err();
    assert_eq!(err.code(), "validation_error");
}

#[test]
fn snapshot_export_and_import_preserve_state() {
    let fx = Fixture::new();
    let v = variant();
    let po = fx.create_order(vec![Fixture::item(&v, 8, 125)]);
    fx.receive(&po.id, &po.items[0].id, 5).unwrap();
    fx.adjust(&v, -2, "SALE").unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.json");
    fx.app.export_snapshot(&path).unwrap();

    let restored = InventoryApp::import_snapshot(
        &path,
        LedgerConfig::default(),
        Arc::new(ManualClock::new(Utc::now())),
    )
    .unwrap();
    restored.verify_levels(None, None).unwrap();

    assert_eq!(restored.get_level(&fx.store, &v).unwrap().quantity, 3);
    let order = restored.get_purchase_order(&po.id).unwrap();
    assert_eq!(order.status, "PARTIALLY_RECEIVED");
    assert_eq!(order.po_number, po.po_number);

    let report = restored.rebuild_levels(Some(&fx.store), None).unwrap();
    assert!(report.drifts.is_empty());

    // Numbering continues after the restored orders.
    let next = restored
        .create_purchase_order(CreatePurchaseOrderRequest {
            store_id: fx.store.clone(),
            supplier_name: "Acme Supply".to_string(),
            items: vec![Fixture::item(&v, 1, 1)],
            created_by: fx.user.clone(),
        })
        .unwrap();
    assert_ne!(next.po_number, po.po_number);
}

#[test]
fn journaled_app_restarts_with_its_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = LedgerConfig {
        journal_path: Some(dir.path().join("ledger.journal")),
        reconcile_interval_secs: 0,
        ..LedgerConfig::default()
    };
    let reopen = || {
        InventoryApp::with_clock(config.clone(), Arc::new(ManualClock::new(Utc::now()))).unwrap()
    };

    let fx = Fixture::with_config(config.clone());
    let v = variant();
    let po = fx.create_order(vec![Fixture::item(&v, 8, 125)]);
    fx.receive(&po.id, &po.items[0].id, 5).unwrap();
    fx.adjust(&v, -2, "SALE").unwrap();
    let before = fx.app.get_level(&fx.store, &v).unwrap();
    drop(fx.app);

    let app = reopen();
    assert_eq!(app.get_level(&fx.store, &v).unwrap(), before);
    app.verify_levels(None, None).unwrap();
    let order = app.get_purchase_order(&po.id).unwrap();
    assert_eq!(order.status, "PARTIALLY_RECEIVED");
    assert_eq!(order.items[0].quantity_received, 5);

    app.compact_journal().unwrap();
    drop(app);

    let app = reopen();
    assert_eq!(app.get_level(&fx.store, &v).unwrap().quantity, 3);
    let next = app
        .create_purchase_order(CreatePurchaseOrderRequest {
            store_id: fx.store.clone(),
            supplier_name: "Acme Supply".to_string(),
            items: vec![Fixture::item(&v, 1, 1)],
            created_by: fx.user.clone(),
        })
        .unwrap();
    assert_ne!(next.po_number, po.po_number);
}

#[test]
fn snapshot_import_rebases_a_configured_journal() {
    let fx = Fixture::new();
    let v = variant();
    fx.adjust(&v, 9, "MANUAL_ADJUSTMENT").unwrap();

    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("inventory.json");
    fx.app.export_snapshot(&snapshot).unwrap();

    let config = LedgerConfig {
        journal_path: Some(dir.path().join("ledger.journal")),
        reconcile_interval_secs: 0,
        ..LedgerConfig::default()
    };
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let imported = InventoryApp::import_snapshot(&snapshot, config.clone(), clock.clone()).unwrap();
    imported
        .adjust_stock(AdjustStockRequest {
            store_id: fx.store.clone(),
            product_variant_id: v.clone(),
            change_quantity: -4,
            reason: "SALE".to_string(),
            note: None,
            created_by: fx.user.clone(),
        })
        .unwrap();
    drop(imported);

    let app = InventoryApp::with_clock(config, clock).unwrap();
    assert_eq!(app.get_level(&fx.store, &v).unwrap().quantity, 5);
}

#[test]
fn reconciliation_worker_respects_configuration() {
    let disabled = Fixture::with_config(LedgerConfig {
        reconcile_interval_secs: 0,
        ..LedgerConfig::default()
    });
    assert!(disabled.app.spawn_reconciliation().unwrap().is_none());

    let enabled = Fixture::with_config(LedgerConfig {
        reconcile_interval_secs: 3600,
        ..LedgerConfig::default()
    });
    let handle = enabled.app.spawn_reconciliation().unwrap();
    handle.expect("worker enabled").shutdown();
}
