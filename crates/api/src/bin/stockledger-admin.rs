use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;

use stockledger_api::InventoryApp;
use stockledger_api::dto::{
    MovementQueryRequest, PurchaseOrderListRequest, RebuildReportView, StockLevelView,
};
use stockledger_infra::{LedgerConfig, SystemClock};

#[derive(Parser)]
#[command(
    name = "stockledger-admin",
    about = "Offline maintenance for stockledger snapshots",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every stock level against the ledger.
    Verify(SnapshotArgs),
    /// Recompute stock levels from the ledger.
    Rebuild(RebuildArgs),
    /// Show stock levels.
    Levels(LevelsArgs),
    /// List purchase orders.
    Orders(OrdersArgs),
    /// Show ledger movements.
    Movements(MovementsArgs),
}

#[derive(Args)]
struct SnapshotArgs {
    #[arg(long, help = "Snapshot file to operate on")]
    snapshot: PathBuf,
}

#[derive(Args)]
struct RebuildArgs {
    #[command(flatten)]
    source: SnapshotArgs,
    #[arg(long, help = "Only rebuild levels of this store")]
    store: Option<String>,
    #[arg(long, help = "Write the repaired state back to the snapshot file")]
    write: bool,
}

#[derive(Args)]
struct LevelsArgs {
    #[command(flatten)]
    source: SnapshotArgs,
    #[arg(long, help = "Only show levels of this store")]
    store: Option<String>,
}

#[derive(Args)]
struct OrdersArgs {
    #[command(flatten)]
    source: SnapshotArgs,
    #[arg(long)]
    store: Option<String>,
    #[arg(long, help = "OPEN, PARTIALLY_RECEIVED, CLOSED or CANCELLED")]
    status: Option<String>,
    #[arg(long, default_value_t = 50)]
    limit: u32,
}

#[derive(Args)]
struct MovementsArgs {
    #[command(flatten)]
    source: SnapshotArgs,
    #[arg(long)]
    store: Option<String>,
    #[arg(long)]
    variant: Option<String>,
    #[arg(long, help = "Only movements linked to this purchase order")]
    purchase_order: Option<String>,
    #[arg(long, default_value_t = 50)]
    limit: u32,
}

fn main() -> Result<()> {
    stockledger_observability::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Verify(args) => handle_verify(args, cli.json)?,
        Commands::Rebuild(args) => handle_rebuild(args, cli.json)?,
        Commands::Levels(args) => handle_levels(args, cli.json)?,
        Commands::Orders(args) => handle_orders(args, cli.json)?,
        Commands::Movements(args) => handle_movements(args, cli.json)?,
    }

    Ok(())
}

fn open(path: &Path) -> Result<InventoryApp> {
    let mut config = LedgerConfig::from_env().context("invalid STOCKLEDGER_* configuration")?;
    // One-shot commands never run the background reconciler or touch the live journal.
    config.reconcile_interval_secs = 0;
    config.journal_path = None;
    InventoryApp::import_snapshot(path, config, Arc::new(SystemClock))
        .with_context(|| format!("failed to load snapshot {}", path.display()))
}

fn handle_verify(args: SnapshotArgs, json: bool) -> Result<()> {
    let app = open(&args.snapshot)?;
    match app.verify_levels(None, None) {
        Ok(()) => {
            if json {
                print_json(&serde_json::json!({ "consistent": true }))?;
            } else {
                println!("All stock levels match the ledger");
            }
            Ok(())
        }
        Err(err) if err.code() == "consistency_error" => {
            if json {
                print_json(&err.to_json())?;
            }
            bail!("{err}");
        }
        Err(err) => Err(err.into()),
    }
}

fn handle_rebuild(args: RebuildArgs, json: bool) -> Result<()> {
    let app = open(&args.source.snapshot)?;
    let report = app
        .rebuild_levels(args.store.as_deref(), None)
        .context("rebuild failed")?;

    if args.write && !report.drifts.is_empty() {
        app.export_snapshot(&args.source.snapshot)
            .context("failed to write repaired snapshot")?;
    }

    if json {
        print_json(&report)?;
    } else {
        render_report(&report, args.write);
    }
    Ok(())
}

fn handle_levels(args: LevelsArgs, json: bool) -> Result<()> {
    let app = open(&args.source.snapshot)?;

    if let Some(store) = args.store.as_deref() {
        let levels = app.list_by_store(store)?;
        if json {
            print_json(&levels)?;
        } else {
            levels.iter().for_each(render_level);
        }
        return Ok(());
    }

    let stores = app.stock_by_store()?;
    if json {
        print_json(&stores)?;
    } else {
        for store in &stores {
            println!("Store {} • {} units", store.store_id, store.total_units);
            store.levels.iter().for_each(render_level);
        }
    }
    Ok(())
}

fn handle_orders(args: OrdersArgs, json: bool) -> Result<()> {
    let app = open(&args.source.snapshot)?;
    let page = app.list_purchase_orders(&PurchaseOrderListRequest {
        store_id: args.store,
        status: args.status,
        limit: Some(args.limit),
        ..Default::default()
    })?;

    if json {
        print_json(&page)?;
    } else {
        for order in &page.orders {
            println!(
                "- {} • {} • {} • received {}/{}",
                order.po_number,
                order.supplier_name,
                order.status,
                order.total_received,
                order.total_ordered
            );
        }
        println!("{} of {} orders", page.orders.len(), page.total);
    }
    Ok(())
}

fn handle_movements(args: MovementsArgs, json: bool) -> Result<()> {
    let app = open(&args.source.snapshot)?;
    let page = app.query_movements(&MovementQueryRequest {
        store_id: args.store,
        product_variant_id: args.variant,
        purchase_order_id: args.purchase_order,
        limit: Some(args.limit),
        ..Default::default()
    })?;

    if json {
        print_json(&page)?;
    } else {
        for m in &page.movements {
            println!(
                "#{} {} • store {} • variant {} • {:+} • {}",
                m.sequence, m.created_at, m.store_id, m.product_variant_id, m.change_quantity, m.reason
            );
        }
        println!("{} of {} movements", page.movements.len(), page.total);
    }
    Ok(())
}

fn render_level(level: &StockLevelView) {
    println!(
        "  {} • {} (v{}, seq {})",
        level.product_variant_id, level.quantity, level.version, level.last_sequence
    );
}

fn render_report(report: &RebuildReportView, written: bool) {
    println!("Scanned {} levels, rewrote {}", report.scanned, report.rewritten);
    for drift in &report.drifts {
        println!(
            "- store {} • variant {} • projected {} • ledger {}",
            drift.store_id, drift.product_variant_id, drift.projected_quantity, drift.ledger_quantity
        );
    }
    if !report.drifts.is_empty() && !written {
        println!("Run again with --write to persist the repaired levels");
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
