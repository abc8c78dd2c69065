//! The supported external e-commerce platforms.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the three supported external platforms.
///
/// Every store connects to exactly one provider, and all sync state (rate
/// limits, external ids, webhook secrets) is scoped per (tenant, provider).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "provider_type", rename_all = "lowercase")
)]
pub enum Provider {
    Shopify,
    WooCommerce,
    EasyOrder,
}

impl Provider {
    /// All supported providers.
    pub const ALL: [Self; 3] = [Self::Shopify, Self::WooCommerce, Self::EasyOrder];

    /// The canonical lowercase name, as used in URLs and the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Shopify => "shopify",
            Self::WooCommerce => "woocommerce",
            Self::EasyOrder => "easyorder",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown provider name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown provider: {0}")]
pub struct ProviderParseError(pub String);

impl FromStr for Provider {
    type Err = ProviderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shopify" => Ok(Self::Shopify),
            "woocommerce" => Ok(Self::WooCommerce),
            "easyorder" => Ok(Self::EasyOrder),
            other => Err(ProviderParseError(other.to_string())),
        }
    }
}
