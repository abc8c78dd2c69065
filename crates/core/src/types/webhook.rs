//! Canonical shapes for inbound provider webhooks.
//!
//! Each provider adapter translates its platform-specific "order created" and
//! "order status" payloads into these unified types before anything touches
//! local state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::status::{OrderStatus, PaymentStatus};

/// A platform-specific "order created" webhook, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedOrderPayload {
    /// The order's id on the external platform.
    pub external_id: String,
    /// Customer contact details, as far as the platform shares them.
    pub customer: CustomerInfo,
    /// Ordered items, keyed by natural keys rather than platform ids.
    pub line_items: Vec<UnifiedLineItem>,
    /// Payment method label (platform vocabulary, informational only).
    pub payment_method: Option<String>,
    /// Normalized payment status.
    pub payment_status: PaymentStatus,
    /// Shipping cost charged on the order.
    pub shipping_cost: Decimal,
    /// ISO 4217 currency code.
    pub currency: String,
    /// When the order was placed on the platform.
    pub placed_at: Option<DateTime<Utc>>,
}

/// Customer contact details from an order webhook.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// A single ordered item, identified by natural keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedLineItem {
    /// Product natural key (slug).
    pub product_key: String,
    /// Variant natural key (SKU or derived signature), when the platform
    /// distinguishes variants.
    pub variant_key: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// A platform-specific "order status" webhook, normalized.
///
/// Adapters return `None` instead when the remote status has no local
/// equivalent; such webhooks are acknowledged and ignored upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    /// The order's id on the external platform.
    pub external_id: String,
    /// The raw status string the platform sent.
    pub remote_status: String,
    /// The local status it maps to.
    pub mapped_status: OrderStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unified_payload_roundtrip() {
        let payload = UnifiedOrderPayload {
            external_id: "1001".to_string(),
            customer: CustomerInfo {
                name: Some("Jo Bloom".to_string()),
                email: Some("jo@example.com".to_string()),
                phone: None,
            },
            line_items: vec![UnifiedLineItem {
                product_key: "linen-shirt".to_string(),
                variant_key: Some("SKU-001".to_string()),
                quantity: 2,
                unit_price: Decimal::new(1999, 2),
            }],
            payment_method: Some("card".to_string()),
            payment_status: PaymentStatus::Paid,
            shipping_cost: Decimal::new(499, 2),
            currency: "EUR".to_string(),
            placed_at: None,
        };

        let json = serde_json::to_string(&payload).expect("serialize");
        let back: UnifiedOrderPayload = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, payload);
    }
}
