// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Two tills sharing one remote store.
//!
//! Demonstrates:
//! 1. An owner signing in on the first till (first login creates the member)
//! 2. Selling while offline; the sale stays dirty locally
//! 3. Reconnecting triggers a pass; the second till downloads the sale
//! 4. The health view and a clean shutdown
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=pos_sync=debug cargo run --example two_tills
//! ```

use std::sync::Arc;
use std::time::Duration;

use pos_sync::clock::{Clock, SystemClock};
use pos_sync::entities::{CatalogItem, LineItem, PaymentMethod, SaleTransaction};
use pos_sync::storage::{InMemoryLocalStore, InMemoryRemoteStore};
use pos_sync::team::{Role, TeamMember};
use pos_sync::{Adapters, EntityKind, SyncConfig, SyncEngine};
use tracing_subscriber::EnvFilter;

async fn till(device_id: &str, remote: Arc<InMemoryRemoteStore>) -> Result<SyncEngine, Box<dyn std::error::Error>> {
    let config = SyncConfig {
        device_id: device_id.into(),
        sync_interval_secs: 5,
        ..Default::default()
    };
    let adapters = Adapters::new(Arc::new(InMemoryLocalStore::new()), remote);
    let engine = SyncEngine::open(config, adapters).await?;
    engine.start()?;
    Ok(engine)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pos_sync=info")))
        .with_target(false)
        .compact()
        .init();

    let remote = Arc::new(InMemoryRemoteStore::new(Arc::new(SystemClock)));
    let front = till("till-front", remote.clone()).await?;
    let back = till("till-back", remote.clone()).await?;

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Sign in and set up the catalog
    // ─────────────────────────────────────────────────────────────────────────
    let owner = TeamMember::new("owner-1", "corner-cafe", "Alex", Role::Owner, SystemClock.now_millis());
    front.sign_in(owner).await?;
    front.save(&CatalogItem::new("espresso", "Espresso", 250)).await?;
    front.reconcile_all().await?;
    println!("catalog uploaded, remote holds {} records", remote.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Sell while offline
    // ─────────────────────────────────────────────────────────────────────────
    front.set_online(false);
    let sale = SaleTransaction {
        id: "sale-0001".into(),
        lines: vec![LineItem {
            catalog_item_id: "espresso".into(),
            quantity: 2,
            unit_price_cents: 250,
        }],
        total_cents: 500,
        payment_method: PaymentMethod::Card,
        party_id: None,
        cashier_id: "owner-1".into(),
        completed_at: SystemClock.now_millis(),
    };
    front.save(&sale).await?;
    let pending = front.tracker().dirty_records(EntityKind::SaleTransaction).await?;
    println!("sale recorded offline, {} record(s) waiting to upload", pending.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Reconnect; the second till picks everything up on its next pass
    // ─────────────────────────────────────────────────────────────────────────
    front.set_online(true);
    tokio::time::sleep(Duration::from_millis(200)).await;
    back.reconcile(&[EntityKind::CatalogItem, EntityKind::SaleTransaction], false).await?;

    let sales = back.list::<SaleTransaction>().await?;
    println!("back till sees {} sale(s)", sales.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Health and shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("{}", serde_json::to_string_pretty(&front.health())?);

    front.shutdown().await;
    back.shutdown().await;
    Ok(())
}
