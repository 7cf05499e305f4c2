// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed point-of-sale entities.
//!
//! Each entity is a plain serde struct implementing [`Entity`]. The engine
//! stores and syncs them as [`SyncRecord`]s; [`Tracked`] pairs a typed
//! entity with its [`SyncMetadata`] on the way back out.
//!
//! # Example
//!
//! ```
//! use pos_sync::entities::{CatalogItem, Entity};
//!
//! let espresso = CatalogItem::new("sku-001", "Espresso", 250);
//! assert!(espresso.validate().is_ok());
//!
//! let free_lunch = CatalogItem::new("sku-002", "Lunch", -1);
//! assert!(free_lunch.validate().is_err());
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::sync_record::{EntityKind, SyncMetadata, SyncRecord, Syncable};

/// A domain type the engine can sync.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const KIND: EntityKind;

    fn entity_id(&self) -> &str;

    /// Reject malformed changes before they reach the local store.
    fn validate(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

/// A typed entity together with its sync metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<E> {
    pub meta: SyncMetadata,
    pub entity: E,
}

impl<E: Entity> Tracked<E> {
    pub fn from_record(record: SyncRecord) -> Result<Self, SyncError> {
        if record.kind != E::KIND {
            return Err(SyncError::Validation(format!(
                "expected {} record, got {}",
                E::KIND,
                record.kind
            )));
        }
        let entity = serde_json::from_value(record.fields)?;
        Ok(Self { meta: record.meta, entity })
    }

    pub fn into_record(self) -> Result<SyncRecord, SyncError> {
        Ok(SyncRecord {
            kind: E::KIND,
            meta: self.meta,
            fields: serde_json::to_value(&self.entity)?,
        })
    }
}

impl<E> Syncable for Tracked<E> {
    fn id(&self) -> &str {
        &self.meta.id
    }

    fn updated_at(&self) -> i64 {
        self.meta.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.meta.is_deleted
    }

    fn device_id(&self) -> &str {
        &self.meta.device_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub price_cents: i64,
    #[serde(default)]
    pub stock: i64,
}

impl CatalogItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price_cents: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            sku: None,
            barcode: None,
            category: None,
            price_cents,
            stock: 0,
        }
    }
}

impl Entity for CatalogItem {
    const KIND: EntityKind = EntityKind::CatalogItem;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), SyncError> {
        if self.name.trim().is_empty() {
            return Err(SyncError::Validation("catalog item needs a name".into()));
        }
        if self.price_cents < 0 {
            return Err(SyncError::Validation(format!(
                "negative price {} for '{}'",
                self.price_cents, self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub catalog_item_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl LineItem {
    #[must_use]
    pub fn total_cents(&self) -> i64 {
        self.unit_price_cents * i64::from(self.quantity)
    }
}

fn lines_total(lines: &[LineItem]) -> i64 {
    lines.iter().map(LineItem::total_cents).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Credit,
}

/// A completed sale. Inserted once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleTransaction {
    pub id: String,
    pub lines: Vec<LineItem>,
    pub total_cents: i64,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub party_id: Option<String>,
    pub cashier_id: String,
    pub completed_at: i64,
}

impl Entity for SaleTransaction {
    const KIND: EntityKind = EntityKind::SaleTransaction;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), SyncError> {
        if self.lines.is_empty() {
            return Err(SyncError::Validation(format!("sale '{}' has no lines", self.id)));
        }
        let expected = lines_total(&self.lines);
        if expected != self.total_cents {
            return Err(SyncError::Validation(format!(
                "sale '{}' total {} does not match lines {}",
                self.id, self.total_cents, expected
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Customer,
    Supplier,
}

/// A customer or supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub id: String,
    pub name: String,
    pub role: PartyRole,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Outstanding credit; positive means the party owes the business
    #[serde(default)]
    pub balance_cents: i64,
}

impl Entity for Party {
    const KIND: EntityKind = EntityKind::Party;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), SyncError> {
        if self.name.trim().is_empty() {
            return Err(SyncError::Validation("party needs a name".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Placed,
    Fulfilled,
    Cancelled,
}

/// A purchase or customer order. Mutable until fulfilled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub party_id: String,
    pub lines: Vec<LineItem>,
    pub status: OrderStatus,
    pub total_cents: i64,
}

impl Entity for Order {
    const KIND: EntityKind = EntityKind::Order;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), SyncError> {
        let expected = lines_total(&self.lines);
        if expected != self.total_cents {
            return Err(SyncError::Validation(format!(
                "order '{}' total {} does not match lines {}",
                self.id, self.total_cents, expected
            )));
        }
        Ok(())
    }
}

/// Business-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub id: String,
    pub business_name: String,
    pub currency: String,
    /// Tax rate in basis points
    pub tax_rate_bps: u32,
    #[serde(default)]
    pub receipt_footer: Option<String>,
}

impl Entity for Configuration {
    const KIND: EntityKind = EntityKind::Configuration;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), SyncError> {
        if self.currency.len() != 3 {
            return Err(SyncError::Validation(format!(
                "currency '{}' is not an ISO 4217 code",
                self.currency
            )));
        }
        if self.tax_rate_bps > 10_000 {
            return Err(SyncError::Validation("tax rate above 100%".into()));
        }
        Ok(())
    }
}
