//! Natural-key derivation for matching local and remote entities.
//!
//! The engine keeps no persisted id-mapping table: local and remote rows are
//! re-matched on every sync by a business-meaningful key. Categories and
//! products match by slug; variants match by SKU when one exists, otherwise
//! by a deterministic signature of their attribute map, otherwise by a
//! synthetic position key.

use std::collections::BTreeMap;

use crate::types::id::ProductId;

/// Canonicalize a human-readable name into a slug.
///
/// Lowercases, maps every non-alphanumeric run to a single `-`, and trims
/// leading/trailing separators. Used when a platform payload carries no
/// usable key (e.g. Shopify order webhooks do not include product handles).
#[must_use]
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_separator = false;

    for c in input.chars() {
        if c.is_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            for lowered in c.to_lowercase() {
                slug.push(lowered);
            }
        } else {
            pending_separator = true;
        }
    }

    slug
}

/// Derive the natural key for a variant.
///
/// Priority order:
/// 1. the SKU, when present and non-empty;
/// 2. the canonicalized attribute signature: sorted `key=value` pairs joined
///    with `;` (the `BTreeMap` guarantees the ordering is deterministic);
/// 3. a synthetic key combining the parent product id and the variant's
///    position, for attribute-less variants.
#[must_use]
pub fn variant_key(
    sku: Option<&str>,
    attributes: &BTreeMap<String, String>,
    product_id: ProductId,
    position: i32,
) -> String {
    if let Some(sku) = sku {
        let sku = sku.trim();
        if !sku.is_empty() {
            return sku.to_string();
        }
    }

    if !attributes.is_empty() {
        return attributes
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";");
    }

    format!("pos-{product_id}-{position}")
}
