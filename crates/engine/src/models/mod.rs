//! Local domain entities the engine synchronizes.
//!
//! These are plain structs, deliberately free of persistence derives: the
//! Postgres repositories map rows by hand and the in-memory repositories
//! clone them directly. The surrounding CRUD application owns their
//! lifecycle; the engine only reads them and writes back external ids and
//! sync/order status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use storebridge_core::{
    CategoryId, CustomerInfo, OrderId, OrderStatus, PaymentStatus, ProductId, Provider, StoreId,
    SyncStatus, TenantId, UnifiedLineItem, VariantId, variant_key,
};

/// Per-provider external ids for a local entity.
///
/// Keyed by provider so one product can be connected to several platforms at
/// once. Stored as JSONB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalIds(BTreeMap<Provider, String>);

impl ExternalIds {
    /// Empty mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// The external id for a provider, if the entity has been pushed there.
    #[must_use]
    pub fn get(&self, provider: Provider) -> Option<&str> {
        self.0.get(&provider).map(String::as_str)
    }

    /// Record an external id. Returns `true` when the mapping actually
    /// changed, so callers can skip the local write on idempotent re-syncs.
    pub fn set(&mut self, provider: Provider, external_id: impl Into<String>) -> bool {
        let external_id = external_id.into();
        if self.get(provider) == Some(external_id.as_str()) {
            return false;
        }
        self.0.insert(provider, external_id);
        true
    }
}

impl FromIterator<(Provider, String)> for ExternalIds {
    fn from_iter<I: IntoIterator<Item = (Provider, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A tenant's connection to one external platform.
///
/// Invariant: at most one active store per (tenant, provider) pair, enforced
/// by a partial unique index. `sync_status` is mutated only by the sync
/// lifecycle module.
#[derive(Debug, Clone)]
pub struct Store {
    pub id: StoreId,
    pub tenant_id: TenantId,
    pub provider: Provider,
    /// Opaque provider-specific secret bundle (JSON), rotated out-of-band.
    pub credentials: SecretString,
    pub active: bool,
    pub sync_status: SyncStatus,
    pub last_sync_attempt_at: Option<DateTime<Utc>>,
    /// Whether scheduled full syncs are enabled for this store.
    pub auto_sync: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Local taxonomy node. The slug is its natural key for remote matching.
#[derive(Debug, Clone)]
pub struct Category {
    pub id: CategoryId,
    pub tenant_id: TenantId,
    pub name: String,
    pub slug: String,
    pub parent_id: Option<CategoryId>,
    pub external_ids: ExternalIds,
}

/// Local catalog product. The slug is its natural key for remote matching.
#[derive(Debug, Clone)]
pub struct Product {
    pub id: ProductId,
    pub tenant_id: TenantId,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub currency: String,
    pub category_id: Option<CategoryId>,
    pub active: bool,
    pub external_ids: ExternalIds,
}

/// A sellable variant of a product.
#[derive(Debug, Clone)]
pub struct Variant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub sku: Option<String>,
    /// Option attributes (e.g. color/size) used to derive the natural key
    /// when no SKU exists.
    pub attributes: BTreeMap<String, String>,
    /// Price override; falls back to the product price when absent.
    pub price: Option<Decimal>,
    pub position: i32,
    pub external_ids: ExternalIds,
}

impl Variant {
    /// The natural key used to match this variant against remote variants.
    #[must_use]
    pub fn natural_key(&self) -> String {
        variant_key(
            self.sku.as_deref(),
            &self.attributes,
            self.product_id,
            self.position,
        )
    }
}

/// A local order, imported from or exported to a platform.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub tenant_id: TenantId,
    pub store_id: StoreId,
    /// Populated once the order exists on the external platform.
    pub external_id: Option<String>,
    pub status: OrderStatus,
    /// The raw status string last reported by the platform.
    pub remote_status: Option<String>,
    pub customer: CustomerInfo,
    pub line_items: Vec<UnifiedLineItem>,
    pub payment_method: Option<String>,
    pub payment_status: PaymentStatus,
    pub shipping_cost: Decimal,
    pub currency: String,
    pub placed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
