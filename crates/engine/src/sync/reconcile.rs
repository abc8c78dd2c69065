//! Natural-key reconciliation helpers.
//!
//! There is no persisted id-mapping table: local and remote entities are
//! re-matched on every sync from natural keys (slug for categories and
//! products, SKU or derived signature for variants).

use crate::models::Variant;
use crate::providers::RemoteVariant;

/// Batch page size for categories. Bounds per-call payload size and
/// rate-limiter load during a full sync.
pub const CATEGORY_PAGE_SIZE: i64 = 30;

/// Batch page size for products (heavier payloads than categories).
pub const PRODUCT_PAGE_SIZE: i64 = 20;

/// Match local variants to the remote variants returned by a product push.
///
/// Primary match is by equal natural key. Variants whose local key is the
/// synthetic position fallback (`pos-…`) cannot be derived remotely, so they
/// pair up by index instead. Unmatched variants are returned with `None`;
/// callers log them and move on.
#[must_use]
pub fn match_variants<'a>(
    locals: &'a [Variant],
    remotes: &'a [RemoteVariant],
) -> Vec<(&'a Variant, Option<&'a RemoteVariant>)> {
    locals
        .iter()
        .enumerate()
        .map(|(index, local)| {
            let key = local.natural_key();
            let matched = remotes
                .iter()
                .find(|remote| remote.natural_key == key)
                .or_else(|| {
                    if key.starts_with("pos-") {
                        remotes.get(index)
                    } else {
                        None
                    }
                });
            (local, matched)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use storebridge_core::{ProductId, VariantId};

    use crate::models::ExternalIds;

    use super::*;

    fn variant(id: i64, sku: Option<&str>, position: i32) -> Variant {
        Variant {
            id: VariantId::new(id),
            product_id: ProductId::new(1),
            sku: sku.map(str::to_string),
            attributes: BTreeMap::new(),
            price: None,
            position,
            external_ids: ExternalIds::new(),
        }
    }

    fn remote(id: &str, key: &str) -> RemoteVariant {
        RemoteVariant {
            external_id: id.to_string(),
            natural_key: key.to_string(),
        }
    }

    #[test]
    fn test_variants_match_by_sku() {
        let locals = vec![variant(1, Some("SKU-A"), 0), variant(2, Some("SKU-B"), 1)];
        let remotes = vec![remote("r2", "SKU-B"), remote("r1", "SKU-A")];

        let matched = match_variants(&locals, &remotes);
        assert_eq!(matched[0].1.map(|r| r.external_id.as_str()), Some("r1"));
        assert_eq!(matched[1].1.map(|r| r.external_id.as_str()), Some("r2"));
    }

    #[test]
    fn test_unmatched_variant_is_none() {
        let locals = vec![variant(1, Some("SKU-A"), 0), variant(2, Some("SKU-GONE"), 1)];
        let remotes = vec![remote("r1", "SKU-A")];

        let matched = match_variants(&locals, &remotes);
        assert!(matched[0].1.is_some());
        assert!(matched[1].1.is_none());
    }

    #[test]
    fn test_positional_fallback_for_attribute_less_variants() {
        // No SKU and no attributes: the local key is synthetic, so pairing
        // is positional.
        let locals = vec![variant(1, None, 0), variant(2, None, 1)];
        let remotes = vec![remote("r1", "position-0"), remote("r2", "position-1")];

        let matched = match_variants(&locals, &remotes);
        assert_eq!(matched[0].1.map(|r| r.external_id.as_str()), Some("r1"));
        assert_eq!(matched[1].1.map(|r| r.external_id.as_str()), Some("r2"));
    }
}
