//! Ephemeral remote entity shapes.
//!
//! These are what adapters hand back from the external platforms. They are
//! never persisted wholesale; after reconciliation only the external id
//! lands on the local record.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

/// A category as it exists on the external platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCategory {
    pub external_id: String,
    /// The platform-side natural key (slug/handle).
    pub natural_key: String,
}

/// A product as it exists on the external platform, with just enough of its
/// variants to reconcile external ids by natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProduct {
    pub external_id: String,
    pub natural_key: String,
    pub variants: Vec<RemoteVariant>,
}

/// A variant stub: external id plus the key it matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteVariant {
    pub external_id: String,
    /// SKU when the platform has one, otherwise a derived signature.
    pub natural_key: String,
}

/// A fully-detailed remote product, used for the reverse direction
/// (importing catalogs owned by the platform).
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteProductDetail {
    pub external_id: String,
    pub natural_key: String,
    pub title: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub currency: Option<String>,
    pub variants: Vec<RemoteVariantDetail>,
}

/// A fully-detailed remote variant for reverse import.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteVariantDetail {
    pub external_id: String,
    pub sku: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub price: Option<Decimal>,
    pub position: i32,
}
