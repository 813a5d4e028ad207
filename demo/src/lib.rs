//! A small checkout library used by the demo zests.
//!
//! Prices come from an external catalog reached through a [`Seam`], so the
//! zests can swap it out.

use std::collections::BTreeMap;
use zest::call;
use zest::mock::Seam;
use zest::raises::Raisable;

#[derive(Debug, Clone, PartialEq, thiserror::Error, serde::Serialize)]
#[serde(untagged)]
pub enum CheckoutError {
    #[error("unknown sku {sku}")]
    UnknownSku { sku: String },

    #[error("quantity must be positive, got {quantity}")]
    BadQuantity { quantity: i64 },

    #[error("catalog unavailable")]
    CatalogDown,
}

impl Raisable for CheckoutError {
    fn args(&self) -> Vec<serde_json::Value> {
        match self {
            Self::UnknownSku { sku } => vec![sku.clone().into()],
            Self::BadQuantity { quantity } => vec![(*quantity).into()],
            Self::CatalogDown => vec![self.to_string().into()],
        }
    }

    fn attr(&self, name: &str) -> Option<serde_json::Value> {
        zest::raises::serde_attr(self, name)
    }
}

/// The catalog lookup: price in cents for a sku.
pub fn catalog() -> Seam<u64> {
    Seam::new("catalog_price", ["sku"], |c| {
        let sku: String = c.get(0, "sku")?;
        match sku.as_str() {
            "apple" => Ok(50),
            "pear" => Ok(75),
            _ => Err(CheckoutError::UnknownSku { sku }.into()),
        }
    })
}

/// A shopping cart priced through a catalog seam.
pub struct Cart {
    catalog: Seam<u64>,
    lines: BTreeMap<String, i64>,
}

impl Cart {
    pub fn new(catalog: Seam<u64>) -> Self {
        Self {
            catalog,
            lines: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, sku: &str, quantity: i64) -> Result<(), CheckoutError> {
        if quantity <= 0 {
            return Err(CheckoutError::BadQuantity { quantity });
        }
        *self.lines.entry(sku.to_string()).or_insert(0) += quantity;
        Ok(())
    }

    pub fn n_items(&self) -> i64 {
        self.lines.values().sum()
    }

    /// Total in cents.
    pub fn total(&self) -> anyhow::Result<u64> {
        let mut total = 0;
        for (sku, quantity) in &self.lines {
            let price = self.catalog.call(call!(sku))?;
            total += price * (*quantity as u64);
        }
        Ok(total)
    }
}
