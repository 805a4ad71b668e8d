//! Purchasable pass products.

use crate::types::PassType;
use serde::{Deserialize, Serialize};

/// A product sold at the kiosk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassProduct {
    /// Pass type issued on purchase
    pub name: PassType,
    /// Uses granted
    pub uses: u32,
    /// Price in won
    pub price_won: u64,
}

impl PassProduct {
    /// Creates a product.
    #[must_use]
    pub fn new(name: impl Into<String>, uses: u32, price_won: u64) -> Self {
        Self {
            name: PassType::new(name),
            uses,
            price_won,
        }
    }
}

/// The set of products on sale.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    products: Vec<PassProduct>,
}

impl Catalog {
    /// Creates a catalog from a product list.
    #[must_use]
    pub const fn new(products: Vec<PassProduct>) -> Self {
        Self { products }
    }

    /// The facility's standard price list.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(vec![
            PassProduct::new("1회권 (첫 체험)", 1, 35_000),
            PassProduct::new("1회권", 1, 40_000),
            PassProduct::new("12회권", 12, 400_000),
            PassProduct::new("26회권", 26, 800_000),
            PassProduct::new("50회권", 50, 1_200_000),
            PassProduct::new("70회권", 70, 1_600_000),
            PassProduct::new("100회권", 100, 2_000_000),
        ])
    }

    /// Looks up a product by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&PassProduct> {
        self.products.iter().find(|p| p.name.as_str() == name)
    }

    /// All products in display order.
    #[must_use]
    pub fn products(&self) -> &[PassProduct] {
        &self.products
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_lookup() {
        let catalog = Catalog::standard();
        let product = catalog.find("12회권").unwrap();
        assert_eq!(product.uses, 12);
        assert_eq!(product.price_won, 400_000);
        assert!(catalog.find("13회권").is_none());
    }

    #[test]
    fn trial_pass_is_distinct_from_single_pass() {
        let catalog = Catalog::standard();
        let trial = catalog.find("1회권 (첫 체험)").unwrap();
        let single = catalog.find("1회권").unwrap();
        assert_eq!(trial.uses, single.uses);
        assert_ne!(trial.name, single.name);
        assert!(trial.price_won < single.price_won);
    }
}
